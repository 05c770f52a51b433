use anyhow::{Context, Result};
use google_sheets4::{hyper, hyper_rustls, oauth2, Sheets};
use std::path::Path;
use tracing::{debug, info};

pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";

pub type SheetsHub = Sheets<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

/// Reads the service account key and builds an authenticated Sheets hub.
/// Only the key file is touched here; tokens are fetched on first request.
pub async fn create_sheets_hub(service_account_file: &Path) -> Result<SheetsHub> {
    info!("Initializing Google Sheets authentication");

    let key = oauth2::read_service_account_key(service_account_file)
        .await
        .with_context(|| {
            format!(
                "Failed to read service account key from {}",
                service_account_file.display()
            )
        })?;
    debug!("Loaded service account key for {}", key.client_email);

    let auth = oauth2::ServiceAccountAuthenticator::builder(key)
        .build()
        .await
        .context("Failed to create service account authenticator")?;

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()?
        .https_or_http()
        .enable_http1()
        .build();
    let client = hyper::Client::builder().build::<_, hyper::Body>(https);

    Ok(Sheets::new(client, auth))
}
