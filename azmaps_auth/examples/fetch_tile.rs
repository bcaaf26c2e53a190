use std::{path::PathBuf, sync::Arc, time::Duration};

use azmaps_auth::{AuthenticationOptions, AuthenticationType, ManagerRegistry};
use azmaps_tokens::{
    sources::{BoxError, FnTokenCallback, TokenCallback},
    store::FileStorage,
    AccessToken,
};
use clap::Parser;
use color_eyre::eyre::{bail, eyre};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The authentication type to use
    #[arg(short, long, env, default_value = "subscriptionKey")]
    auth_type: AuthenticationType,

    /// The Azure Maps host to request tiles from
    #[arg(short, long, env = "AZ_MAPS_DOMAIN", default_value = "atlas.microsoft.com")]
    domain: String,

    /// The subscription key of the Azure Maps account
    #[arg(short, long, env, hide_env_values = true)]
    subscription_key: Option<String>,

    /// The client ID of the Azure Maps account
    #[arg(short, long, env)]
    client_id: Option<String>,

    /// An application endpoint that returns a fresh token as its response body
    #[arg(short, long, env)]
    token_url: Option<reqwest::Url>,

    /// The local file used to persist tokens between runs
    #[arg(short = 'f', long, env, default_value = ".azmaps-tokens.json")]
    credentials_file: PathBuf,

    /// How many times to fetch the tile
    #[arg(short, long, default_value_t = 3)]
    repeat: u32,
}

const TILE_URL: &str = "https://{azMapsDomain}/map/tile?api-version=2.1&tilesetId=microsoft.base.road&zoom=1&x=0&y=0";

fn token_endpoint(client: reqwest::Client, url: reqwest::Url) -> Arc<dyn TokenCallback> {
    Arc::new(FnTokenCallback::new(move || {
        let client = client.clone();
        let url = url.clone();
        async move {
            let body = client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            Ok::<_, BoxError>(AccessToken::new(body.trim().to_owned()))
        }
    }))
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().https_only(true).build()?;

    let options = match opts.auth_type {
        AuthenticationType::SubscriptionKey => {
            let key = opts
                .subscription_key
                .ok_or_else(|| eyre!("a subscription key is required"))?;
            AuthenticationOptions::subscription_key(key)
        }
        AuthenticationType::AnonymousCallback | AuthenticationType::SasCallback => {
            let client_id = opts
                .client_id
                .ok_or_else(|| eyre!("a client ID is required"))?;
            let token_url = opts
                .token_url
                .ok_or_else(|| eyre!("a token URL is required"))?;
            let get_token = token_endpoint(client.clone(), token_url);

            if opts.auth_type == AuthenticationType::SasCallback {
                AuthenticationOptions::sas(client_id, get_token)
            } else {
                AuthenticationOptions::anonymous(client_id, get_token)
            }
        }
        AuthenticationType::FederatedIdentity => {
            bail!("federated identity requires an interactive identity context")
        }
    }
    .with_domain(opts.domain);

    let registry = ManagerRegistry::builder()
        .with_durable_storage(Arc::new(FileStorage::new(opts.credentials_file)))
        .with_http_client(client)
        .build();

    let manager = registry.get_instance(Some(options))?;
    manager.initialize().await?;

    tracing::info!(
        session_id = manager.session_id(),
        auth_type = %manager.auth_type(),
        "authentication initialized"
    );

    let mut interval = time::interval(Duration::from_secs(5));
    for _ in 0..opts.repeat {
        interval.tick().await;

        let response = manager.get_request(TILE_URL).await?;
        tracing::info!(
            status = %response.status(),
            content_type = ?response.headers().get(reqwest::header::CONTENT_TYPE),
            renewal_due = ?manager.pending_renewal(),
            "fetched tile"
        );
    }

    Ok(())
}
