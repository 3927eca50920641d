use crate::config::Config;
use crate::error::{AppError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::fmt::Debug;
use surrealdb::engine::remote::http::{Client, Http};
use surrealdb::opt::auth::Root;
use surrealdb::{Response, Surreal};
use tracing::{debug, error, info};

/// 数据库服务
#[derive(Clone)]
pub struct Database {
    client: Surreal<Client>,
    pub config: Config,
}

impl Database {
    /// 创建新的数据库实例
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let client = Surreal::new::<Http>(config.database_url.as_str()).await?;

        client
            .signin(Root {
                username: &config.database_username,
                password: &config.database_password,
            })
            .await?;

        client
            .use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match self.client.query("INFO FOR DB").await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(AppError::from(e))
            }
        }
    }

    /// 建表索引, 启动时幂等执行
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            // (channel, uid) 唯一索引是去重的最终保障
            "DEFINE INDEX items_channel_uid ON TABLE items COLUMNS channel, uid UNIQUE",
            "DEFINE INDEX items_channel_published ON TABLE items COLUMNS channel, published",
            "DEFINE INDEX items_feed ON TABLE items COLUMNS feed_id",
            // 按 url 标记已读需要的索引
            "DEFINE INDEX items_channel_url ON TABLE items COLUMNS channel, url",
            "DEFINE INDEX notifications_channel_uid ON TABLE notifications COLUMNS channel, uid UNIQUE",
            "DEFINE INDEX notifications_source_target ON TABLE notifications COLUMNS mention_source, mention_target",
            "DEFINE INDEX feeds_channel_url ON TABLE feeds COLUMNS channel, url UNIQUE",
            "DEFINE INDEX channels_owner_uid ON TABLE channels COLUMNS owner, uid UNIQUE",
            "DEFINE INDEX muted_owner_url ON TABLE muted COLUMNS owner, url",
            "DEFINE INDEX blocked_owner_url ON TABLE blocked COLUMNS owner, url UNIQUE",
            // 加权全文检索: name(10) summary(5) content.text(3) content.html(2) author.name(1)
            "DEFINE ANALYZER reader_text TOKENIZERS class FILTERS lowercase, ascii",
            "DEFINE INDEX items_search_name ON TABLE items COLUMNS name SEARCH ANALYZER reader_text BM25",
            "DEFINE INDEX items_search_summary ON TABLE items COLUMNS summary SEARCH ANALYZER reader_text BM25",
            "DEFINE INDEX items_search_text ON TABLE items COLUMNS content.text SEARCH ANALYZER reader_text BM25",
            "DEFINE INDEX items_search_html ON TABLE items COLUMNS content.html SEARCH ANALYZER reader_text BM25",
            "DEFINE INDEX items_search_author ON TABLE items COLUMNS author.name SEARCH ANALYZER reader_text BM25",
        ];

        for statement in statements {
            self.client.query(statement).await?;
        }

        info!("Database schema initialized");
        Ok(())
    }

    /// 执行原始SQL查询
    pub async fn query(&self, sql: &str) -> Result<Response> {
        self.client.query(sql).await.map_err(AppError::from)
    }

    /// 执行带参数的查询
    pub async fn query_with_params<P>(&self, sql: &str, params: P) -> Result<Response>
    where
        P: Serialize + 'static,
    {
        self.client
            .query(sql)
            .bind(params)
            .await
            .map_err(AppError::from)
    }

    /// 创建记录, 记录 id 由调用方在 data.id 中给出
    pub async fn create<T>(&self, table: &str, data: T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + Debug,
    {
        let mut content = serde_json::to_value(&data)?;
        let id = content
            .as_object_mut()
            .and_then(|obj| obj.remove("id"))
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| AppError::internal("Record is missing an id field"))?;

        debug!("Creating record {}:{}", table, id);

        let mut response = self
            .client
            .query("CREATE type::thing($tb, $id) CONTENT $data RETURN AFTER")
            .bind(json!({
                "tb": table,
                "id": id,
                "data": content,
            }))
            .await?;

        let created: Vec<T> = response.take(0)?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| AppError::internal("Failed to create record"))
    }

    /// 通过ID获取单个记录
    pub async fn get_by_id<T>(&self, table: &str, id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + Debug,
    {
        let mut response = self
            .client
            .query("SELECT * FROM type::thing($tb, $id)")
            .bind(json!({ "tb": table, "id": id }))
            .await?;

        let results: Vec<T> = response.take(0)?;
        Ok(results.into_iter().next())
    }

    /// 通过ID合并更新记录
    pub async fn update_by_id<T>(
        &self,
        table: &str,
        id: &str,
        updates: serde_json::Value,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + Debug,
    {
        let mut response = self
            .client
            .query("UPDATE type::thing($tb, $id) MERGE $updates RETURN AFTER")
            .bind(json!({ "tb": table, "id": id, "updates": updates }))
            .await?;

        let results: Vec<T> = response.take(0)?;
        Ok(results.into_iter().next())
    }

    /// 通过ID删除记录
    pub async fn delete_by_id(&self, table: &str, id: &str) -> Result<()> {
        self.client
            .query("DELETE type::thing($tb, $id)")
            .bind(json!({ "tb": table, "id": id }))
            .await?;
        Ok(())
    }

    /// 查找单个记录
    pub async fn find_one<T>(&self, table: &str, field: &str, value: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + Debug,
    {
        let sql = format!(
            "SELECT * FROM type::table($tb) WHERE {} = $value LIMIT 1",
            field
        );
        let mut response = self
            .client
            .query(sql)
            .bind(json!({ "tb": table, "value": value }))
            .await?;

        let results: Vec<T> = response.take(0)?;
        Ok(results.into_iter().next())
    }
}
