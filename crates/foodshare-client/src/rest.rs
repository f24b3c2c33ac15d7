//! Table and RPC access over the backend's REST interface.
//!
//! Filters use the PostgREST query-string grammar (`col=eq.value`,
//! `or=(...)`, `order=col.desc.nullslast`).

use std::fmt::Display;
use std::sync::Arc;

use reqwest::header::{CONTENT_RANGE, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// A read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            params: Vec::new(),
        }
    }

    fn param(mut self, key: &str, value: String) -> Self {
        self.params.push((key.to_string(), value));
        self
    }

    pub fn select(self, columns: &str) -> Self {
        self.param("select", columns.to_string())
    }

    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("eq.{}", value))
    }

    pub fn neq(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("neq.{}", value))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.param(column, "is.null".to_string())
    }

    pub fn not_null(self, column: &str) -> Self {
        self.param(column, "not.is.null".to_string())
    }

    pub fn in_list<T: Display>(self, column: &str, values: impl IntoIterator<Item = T>) -> Self {
        let list = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.param(column, format!("in.({})", list))
    }

    /// Any of the given `col.op.value` conditions.
    pub fn or(self, conditions: &[String]) -> Self {
        self.param("or", format!("({})", conditions.join(",")))
    }

    /// Descending, rows without a value last.
    pub fn order_desc(self, column: &str) -> Self {
        self.param("order", format!("{}.desc.nullslast", column))
    }

    pub fn limit(self, n: usize) -> Self {
        self.param("limit", n.to_string())
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    config: Arc<ClientConfig>,
}

impl RestClient {
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request carrying the API key and the session token (or the API key
    /// again when anonymous).
    fn request(&self, method: Method, url: url::Url) -> RequestBuilder {
        let bearer = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.anon_key);
        self.http
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    fn query(&self, method: Method, query: &Query) -> Result<RequestBuilder> {
        let url = self.config.rest_url(query.table_name())?;
        Ok(self.request(method, url).query(query.params()))
    }

    pub async fn select<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>> {
        trace!(table = query.table_name(), "select");
        let resp = check(self.query(Method::GET, query)?.send().await?).await?;
        Ok(resp.json().await?)
    }

    /// First row of a select, if any.
    pub async fn select_one<T: DeserializeOwned>(&self, query: &Query) -> Result<Option<T>> {
        let rows = self.select(&query.clone().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Number of matching rows, without transferring them.
    pub async fn count(&self, query: &Query) -> Result<u64> {
        trace!(table = query.table_name(), "count");
        let resp = self
            .query(Method::HEAD, query)?
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let resp = check(resp).await?;
        parse_content_range(resp.headers().get(CONTENT_RANGE))
    }

    /// Insert one row and return it as stored.
    pub async fn insert<B, T>(&self, table: &str, row: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        trace!(table, "insert");
        let url = self.config.rest_url(table)?;
        let resp = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        let rows: Vec<T> = check(resp).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClientError::Decode(format!("insert into {} returned no row", table)))
    }

    /// Patch every row matching `query`.
    pub async fn update<B: Serialize + ?Sized>(&self, query: &Query, patch: &B) -> Result<()> {
        trace!(table = query.table_name(), "update");
        let resp = self
            .query(Method::PATCH, query)?
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn rpc<B, T>(&self, function: &str, args: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        trace!(function, "rpc");
        let url = self.config.rpc_url(function)?;
        let resp = self.request(Method::POST, url).json(args).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    /// GET an arbitrary backend endpoint with the session headers.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: url::Url) -> Result<T> {
        let resp = self.request(Method::GET, url).send().await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Turn error statuses into [`ClientError`]s, keeping the backend's message.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range(header: Option<&HeaderValue>) -> Result<u64> {
    let raw = header
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ClientError::Decode("missing Content-Range header".into()))?;
    raw.rsplit_once('/')
        .and_then(|(_, total)| total.parse().ok())
        .ok_or_else(|| ClientError::Decode(format!("unexpected Content-Range {:?}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_builds_postgrest_params() {
        let q = Query::table("messages")
            .select("*")
            .eq("conversation_id", "c1")
            .neq("sender_id", "u1")
            .is_null("read_at")
            .order_desc("created_at")
            .limit(1);

        let params: Vec<(&str, &str)> = q
            .params()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            params,
            vec![
                ("select", "*"),
                ("conversation_id", "eq.c1"),
                ("sender_id", "neq.u1"),
                ("read_at", "is.null"),
                ("order", "created_at.desc.nullslast"),
                ("limit", "1"),
            ]
        );
    }

    #[test]
    fn or_and_in_lists() {
        let q = Query::table("profiles")
            .in_list("id", ["a", "b"])
            .or(&["user1_id.eq.a".to_string(), "user2_id.eq.a".to_string()]);

        assert_eq!(q.params()[0], ("id".to_string(), "in.(a,b)".to_string()));
        assert_eq!(
            q.params()[1],
            ("or".to_string(), "(user1_id.eq.a,user2_id.eq.a)".to_string())
        );
    }

    #[test]
    fn content_range_totals() {
        let total = |raw: &str| parse_content_range(Some(&HeaderValue::from_str(raw).unwrap()));

        assert_eq!(total("0-24/3573").unwrap(), 3573);
        assert_eq!(total("*/0").unwrap(), 0);
        assert!(total("0-24/*").is_err());
        assert!(parse_content_range(None).is_err());
    }
}
