use chrono::{DateTime, Duration, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

use super::client::{EmptySerde, ExecMethod, RequestId, SnowflakeClient};
use super::errors::{Result, WarehouseError};

const SESSION_ENDPOINT: &str = "/session";
const AUTH_ENDPOINT: &str = "/session/v1/login-request";

const CLIENT_APP_ID: &str = env!("CARGO_PKG_NAME");
const CLIENT_APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
pub struct Token {
    value: String,
    validity: Duration,
    created_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: String, validity_in_seconds: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            value,
            validity: Duration::seconds(validity_in_seconds),
            created_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_valid(&self) -> bool {
        Utc::now().signed_duration_since(self.created_at) < self.validity
    }
}

#[derive(Debug)]
pub struct Session {
    pub token: Token,
}

#[derive(Debug, Serialize)]
struct SessionParams {
    delete: bool,
}

impl Session {
    pub async fn close(&self, client: &SnowflakeClient) -> Result<()> {
        let _: serde_json::Value = client
            .execute(
                ExecMethod::Post,
                SESSION_ENDPOINT,
                Some(&SessionParams { delete: true }),
                EmptySerde::new(),
                Some(self.token.value()),
            )
            .await?;
        Ok(())
    }
}

/// Password login against the session endpoint.
#[derive(Debug)]
pub struct PasswordLogin {
    pub account_name: String,
    pub login_name: String,
    pub password: String,
}

#[derive(Debug, Default)]
pub struct LoginOptions {
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
    pub warehouse: Option<String>,
    pub role_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginParams {
    request_id: RequestId,

    #[serde(skip_serializing_if = "Option::is_none")]
    database_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    schema_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    role_name: Option<String>,
}

impl From<LoginOptions> for LoginParams {
    fn from(value: LoginOptions) -> Self {
        Self {
            request_id: RequestId::new(),
            database_name: value.database_name,
            schema_name: value.schema_name,
            warehouse: value.warehouse,
            role_name: value.role_name,
        }
    }
}

#[derive(Debug, Default)]
struct ClientEnvironment;

impl Serialize for ClientEnvironment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_map(None)?;
        s.serialize_entry("APPLICATION", CLIENT_APP_ID)?;
        s.serialize_entry("OS", std::env::consts::OS)?;
        s.serialize_entry("OS_VERSION", std::env::consts::ARCH)?;
        s.end()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginBodyData {
    client_app_id: &'static str,
    client_app_version: &'static str,
    client_environment: ClientEnvironment,
    account_name: String,
    login_name: String,
    password: String,
}

impl From<PasswordLogin> for LoginBodyData {
    fn from(value: PasswordLogin) -> Self {
        Self {
            client_app_id: CLIENT_APP_ID,
            client_app_version: CLIENT_APP_VERSION,
            client_environment: ClientEnvironment,
            account_name: value.account_name,
            login_name: value.login_name,
            password: value.password,
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest {
    data: LoginBodyData,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    data: Option<TokenResponse>,
    message: Option<String>,
    code: Option<String>,
    success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: Option<String>,
    validity_in_seconds: Option<i64>,
}

impl LoginResponse {
    fn into_session(self) -> Result<Session> {
        if !self.success {
            return Err(WarehouseError::AuthError {
                code: self.code.unwrap_or_default(),
                message: self.message.unwrap_or_default(),
            });
        }

        let data = self
            .data
            .ok_or_else(|| WarehouseError::InvalidResponse("login response has no data".to_string()))?;
        let token = data
            .token
            .ok_or_else(|| WarehouseError::InvalidResponse("login response has no session token".to_string()))?;
        let validity = data.validity_in_seconds.unwrap_or(3600);

        Ok(Session {
            token: Token::new(token, validity, Utc::now()),
        })
    }
}

impl PasswordLogin {
    pub(crate) async fn authenticate(self, client: &SnowflakeClient, opts: LoginOptions) -> Result<Session> {
        let params: LoginParams = opts.into();
        let res: LoginResponse = client
            .execute(
                ExecMethod::Post,
                AUTH_ENDPOINT,
                Some(&params),
                LoginRequest { data: self.into() },
                /* token = */ None,
            )
            .await?;
        res.into_session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_body_uses_screaming_snake_keys() {
        let body = LoginRequest {
            data: PasswordLogin {
                account_name: "xy12345".into(),
                login_name: "loader".into(),
                password: "pw".into(),
            }
            .into(),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["data"]["ACCOUNT_NAME"], "xy12345");
        assert_eq!(value["data"]["LOGIN_NAME"], "loader");
        assert_eq!(value["data"]["PASSWORD"], "pw");
        assert_eq!(value["data"]["CLIENT_APP_ID"], CLIENT_APP_ID);
        assert!(value["data"]["CLIENT_ENVIRONMENT"]["OS"].is_string());
    }

    #[test]
    fn login_params_skip_unset_options() {
        let params: LoginParams = LoginOptions {
            warehouse: Some("LOAD_WH".into()),
            ..Default::default()
        }
        .into();
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["warehouse"], "LOAD_WH");
        assert!(value.get("roleName").is_none());
        assert!(value["requestId"].is_string());
    }

    #[test]
    fn successful_login_yields_session() {
        let res: LoginResponse = serde_json::from_value(json!({
            "data": {"token": "abc", "validityInSeconds": 3600, "masterToken": "m"},
            "message": null,
            "code": null,
            "success": true
        }))
        .unwrap();
        let session = res.into_session().unwrap();
        assert_eq!(session.token.value(), "abc");
        assert!(session.token.is_valid());
    }

    #[test]
    fn failed_login_surfaces_code_and_message() {
        let res: LoginResponse = serde_json::from_value(json!({
            "data": null,
            "message": "Incorrect username or password was specified.",
            "code": "390100",
            "success": false
        }))
        .unwrap();
        let err = res.into_session().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Snowflake authentication error (390100): Incorrect username or password was specified."
        );
    }

    #[test]
    fn expired_token_is_invalid() {
        let token = Token::new("t".into(), 10, Utc::now() - Duration::seconds(60));
        assert!(!token.is_valid());
    }
}
