use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::client::{EmptySerde, ExecMethod, RequestId, SnowflakeClient};
use super::errors::{Result, WarehouseError};
use super::session::Session;

const QUERY_ENDPOINT: &str = "/queries/v1/query-request";

/// Codes Snowflake returns while a statement is still running.
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";

const POLL_INITIAL: Duration = Duration::from_millis(500);
const POLL_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody {
    sql_text: String,
    async_exec: bool,
    sequence_id: u64,
    is_internal: bool,
    describe_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParams {
    request_id: RequestId,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Option<QueryData>,
    message: Option<String>,
    code: Option<String>,
    success: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    query_id: Option<String>,
    get_result_url: Option<String>,
}

enum QueryState {
    Done { query_id: Option<String> },
    Running { result_url: String },
}

impl QueryResponse {
    fn state(self) -> Result<QueryState> {
        let in_progress = matches!(
            self.code.as_deref(),
            Some(QUERY_IN_PROGRESS) | Some(QUERY_IN_PROGRESS_ASYNC)
        );
        let data = self.data.unwrap_or_default();

        if in_progress {
            let result_url = data.get_result_url.ok_or_else(|| {
                WarehouseError::InvalidResponse("running query has no result URL".to_string())
            })?;
            return Ok(QueryState::Running { result_url });
        }

        if !self.success {
            return Err(WarehouseError::QueryError {
                code: self.code.unwrap_or_default(),
                message: self.message.unwrap_or_default(),
            });
        }

        Ok(QueryState::Done {
            query_id: data.query_id,
        })
    }
}

pub struct Query {
    pub sql: String,
    pub sequence_id: u64,
}

impl Query {
    /// Runs a statement that returns nothing we need, waiting for it to
    /// finish. Returns the Snowflake query id when one is reported.
    pub async fn exec(self, client: &SnowflakeClient, session: &Session) -> Result<Option<String>> {
        if !session.token.is_valid() {
            warn!("Snowflake session token has expired; the server will reject the statement");
        }

        let res: QueryResponse = client
            .execute(
                ExecMethod::Post,
                QUERY_ENDPOINT,
                Some(&QueryParams {
                    request_id: RequestId::new(),
                }),
                QueryBody {
                    sql_text: self.sql,
                    sequence_id: self.sequence_id,
                    ..Default::default()
                },
                Some(session.token.value()),
            )
            .await?;

        let mut state = res.state()?;
        let mut delay = POLL_INITIAL;
        loop {
            match state {
                QueryState::Done { query_id } => return Ok(query_id),
                QueryState::Running { result_url } => {
                    debug!("Statement still running, polling {} in {:?}", result_url, delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(POLL_MAX);

                    let res: QueryResponse = client
                        .execute(
                            ExecMethod::Get,
                            &result_url,
                            None::<&EmptySerde>,
                            EmptySerde::new(),
                            Some(session.token.value()),
                        )
                        .await?;
                    state = res.state()?;
                }
            }
        }
    }
}
