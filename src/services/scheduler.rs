use crate::{
    config::Config,
    error::{AppError, Result},
    services::{FeedService, ProcessorService, WebSubService},
};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MIN_TIER: i64 = 0;
pub const MAX_TIER: i64 = 10;

/// 轮询间隔: 2^tier 分钟, 1 分钟到约 17 小时
pub fn interval_for_tier(tier: i64) -> Duration {
    let tier = tier.clamp(MIN_TIER, MAX_TIER);
    Duration::minutes(1 << tier)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierUpdate {
    pub tier: i64,
    pub unmodified: i64,
}

/// 抓取结果落到轮询层级:
/// 有新条目降一级立即变勤, 连续无变化攒够阈值升一级,
/// 出错在此之上再升一级避免重试风暴
pub fn calculate_new_tier(
    current_tier: i64,
    unmodified: i64,
    has_new_items: bool,
    had_error: bool,
) -> TierUpdate {
    let mut tier = current_tier.clamp(MIN_TIER, MAX_TIER);
    let mut unmodified = unmodified.max(0);

    if has_new_items {
        tier = (tier - 1).max(MIN_TIER);
        unmodified = 0;
    } else {
        unmodified += 1;
        if unmodified >= 2.max(tier) && tier < MAX_TIER {
            tier += 1;
            unmodified = 0;
        }
    }

    if had_error {
        tier = (tier + 1).min(MAX_TIER);
    }

    TierUpdate { tier, unmodified }
}

pub fn next_fetch_at(tier: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    now + interval_for_tier(tier)
}

#[derive(Clone)]
pub struct SchedulerService {
    feed_service: FeedService,
    processor: ProcessorService,
    websub_service: WebSubService,
    config: Config,
    /// 周期不可重入: 上一轮没跑完时直接跳过, 不排队
    is_running: Arc<AtomicBool>,
}

impl SchedulerService {
    pub fn new(
        feed_service: FeedService,
        processor: ProcessorService,
        websub_service: WebSubService,
        config: &Config,
    ) -> Self {
        Self {
            feed_service,
            processor,
            websub_service,
            config: config.clone(),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 一轮调度: 排空到期订阅, 按并发上限分批派发
    pub async fn tick(&self) {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Previous scheduler cycle still running, skipping tick");
            return;
        }

        if let Err(e) = self.run_cycle().await {
            warn!("Scheduler cycle failed: {}", e);
        }

        self.is_running.store(false, Ordering::SeqCst);
    }

    async fn run_cycle(&self) -> Result<()> {
        let feeds = self.feed_service.get_feeds_to_fetch().await?;
        if !feeds.is_empty() {
            info!("Scheduler cycle: {} feeds due", feeds.len());
        }

        for batch in feeds.chunks(self.config.batch_concurrency.max(1)) {
            let jobs = batch.iter().map(|feed| {
                let processor = self.processor.clone();
                async move {
                    if let Err(e) = processor.process_feed(feed).await {
                        // 单个 feed 的失败不允许中断整轮调度
                        warn!("Processing {} failed: {}", feed.url, e);
                    }
                }
            });
            join_all(jobs).await;
        }

        self.renew_expiring_leases().await;
        Ok(())
    }

    /// 租约 24 小时内到期的 WebSub 订阅, 周期末尾统一续订
    async fn renew_expiring_leases(&self) {
        let candidates = match self.feed_service.websub_renewal_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Lease renewal sweep failed: {}", e);
                return;
            }
        };

        for feed in candidates {
            let Some(websub) = &feed.websub else { continue };
            debug!("Renewing WebSub lease for {}", feed.url);
            if let Err(e) = self
                .websub_service
                .subscribe(&feed, &websub.hub, &websub.topic)
                .await
            {
                warn!("WebSub renewal failed for {}: {}", feed.url, e);
            }
        }
    }

    /// 手动刷新: 在调度周期之外单独跑一次处理
    pub async fn refresh_feed_now(&self, feed_id: &str) -> Result<()> {
        let feed = self
            .feed_service
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| AppError::not_found("Feed"))?;
        self.processor.process_feed(&feed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_law() {
        assert_eq!(interval_for_tier(0), Duration::minutes(1));
        assert_eq!(interval_for_tier(1), Duration::minutes(2));
        assert_eq!(interval_for_tier(5), Duration::minutes(32));
        assert_eq!(interval_for_tier(10), Duration::minutes(1024));
        // 越界层级被钳制
        assert_eq!(interval_for_tier(-3), Duration::minutes(1));
        assert_eq!(interval_for_tier(99), Duration::minutes(1024));
    }

    #[test]
    fn test_new_items_drop_tier() {
        let update = calculate_new_tier(5, 3, true, false);
        assert_eq!(update, TierUpdate { tier: 4, unmodified: 0 });

        // tier 0 封底
        let update = calculate_new_tier(0, 0, true, false);
        assert_eq!(update, TierUpdate { tier: 0, unmodified: 0 });
    }

    #[test]
    fn test_unmodified_accumulates_until_threshold() {
        // u+1 < max(2, t): 只累加计数
        let update = calculate_new_tier(5, 0, false, false);
        assert_eq!(update, TierUpdate { tier: 5, unmodified: 1 });

        // u+1 >= max(2, t): 升级并清零
        let update = calculate_new_tier(5, 4, false, false);
        assert_eq!(update, TierUpdate { tier: 6, unmodified: 0 });

        // 低层级阈值下限是 2
        let update = calculate_new_tier(0, 1, false, false);
        assert_eq!(update, TierUpdate { tier: 1, unmodified: 0 });
    }

    #[test]
    fn test_tier_ten_is_terminal() {
        let update = calculate_new_tier(10, 100, false, false);
        assert_eq!(update.tier, 10);

        let update = calculate_new_tier(10, 0, false, true);
        assert_eq!(update.tier, 10);
    }

    #[test]
    fn test_error_bumps_one_extra_step() {
        let update = calculate_new_tier(3, 0, false, true);
        // 无变化规则只累加计数, 错误在此之上再抬一级
        assert_eq!(update, TierUpdate { tier: 4, unmodified: 1 });
    }

    #[test]
    fn test_repeated_quiet_fetches_reach_terminal_tier() {
        let mut tier = 1;
        let mut unmodified = 0;
        let mut steps = 0;

        while tier < MAX_TIER {
            let update = calculate_new_tier(tier, unmodified, false, false);
            // 层级单调不降
            assert!(update.tier >= tier);
            tier = update.tier;
            unmodified = update.unmodified;
            steps += 1;
            assert!(steps < 100, "escalation must terminate");
        }

        assert_eq!(tier, MAX_TIER);
        // 到顶之后保持稳定
        let update = calculate_new_tier(tier, unmodified, false, false);
        assert_eq!(update.tier, MAX_TIER);
    }

    #[test]
    fn test_next_fetch_at_matches_interval() {
        let now = Utc::now();
        assert_eq!(next_fetch_at(3, now) - now, Duration::minutes(8));
    }
}
