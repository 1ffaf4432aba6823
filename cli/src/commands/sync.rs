use anyhow::{Result, bail};
use chrono::{Local, TimeZone};
use serde::Serialize;

use boilerfuel_core::error::SyncError;
use boilerfuel_core::models::SyncPairing;
use boilerfuel_core::store::Store;
use boilerfuel_core::sync::{RelayTransport, SyncClient, SyncStatus};

use super::helpers::print_qr_code;

fn pair_link(pairing: &SyncPairing) -> String {
    format!(
        "boilerfuel://pair?token={}&secret={}",
        pairing.token, pairing.secret
    )
}

/// Turn the client's last error status into a CLI error.
fn sync_failure<T: RelayTransport>(client: &SyncClient<T>, what: &str) -> anyhow::Error {
    match client.status() {
        SyncStatus::Error(SyncError::TokenNotFound) => anyhow::anyhow!(
            "{what} failed: sync code not found. Run `boilerfuel sync create` or `boilerfuel sync join` again"
        ),
        SyncStatus::Error(SyncError::Decrypt) => {
            anyhow::anyhow!("{what} failed: wrong secret for this sync code")
        }
        SyncStatus::Error(e) => anyhow::anyhow!("{what} failed: {e}"),
        other => anyhow::anyhow!("{what} failed (status: {other})"),
    }
}

fn print_pairing(pairing: &SyncPairing, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "token": pairing.token,
                "secret": pairing.secret,
                "link": pair_link(pairing),
            })
        );
        return Ok(());
    }
    println!("Sync code: {}", pairing.token);
    println!("Secret:    {}", pairing.secret);
    println!();
    println!(
        "On your other device run: boilerfuel sync join {} {}",
        pairing.token, pairing.secret
    );
    print_qr_code(&pair_link(pairing));
    Ok(())
}

pub(crate) async fn cmd_sync_create<T: RelayTransport>(
    client: &SyncClient<T>,
    json: bool,
) -> Result<()> {
    if client.pairing().is_some() {
        bail!("This device is already paired. Run `boilerfuel sync unpair` first");
    }
    if !client.create().await {
        return Err(sync_failure(client, "Create"));
    }
    let Some(pairing) = client.pairing() else {
        bail!("Pairing was not saved");
    };
    print_pairing(&pairing, json)
}

pub(crate) async fn cmd_sync_join<T: RelayTransport>(
    client: &SyncClient<T>,
    token: &str,
    secret: &str,
    json: bool,
) -> Result<()> {
    if !client.join(token, secret).await {
        return Err(sync_failure(client, "Join"));
    }
    let token = client.pairing().map(|p| p.token).unwrap_or_default();
    if json {
        println!("{}", serde_json::json!({ "joined": token }));
    } else {
        println!("Joined sync code {token}. Your data is merged with the other device.");
    }
    Ok(())
}

pub(crate) async fn cmd_sync_unpair<T: RelayTransport>(
    client: &SyncClient<T>,
    json: bool,
) -> Result<()> {
    let Some(pairing) = client.pairing() else {
        if json {
            println!("{}", serde_json::json!({ "unpaired": false }));
        } else {
            println!("This device is not paired");
        }
        return Ok(());
    };

    let remote_deleted = client.unpair().await;
    if json {
        println!(
            "{}",
            serde_json::json!({ "unpaired": true, "remote_deleted": remote_deleted })
        );
    } else {
        println!("Unpaired from {}", pairing.token);
        if !remote_deleted {
            eprintln!("The relay could not be reached; the remote copy may remain until it expires");
        }
    }
    Ok(())
}

pub(crate) async fn cmd_sync_pull<T: RelayTransport>(
    client: &SyncClient<T>,
    json: bool,
) -> Result<()> {
    if !client.pull_now().await {
        return Err(sync_failure(client, "Pull"));
    }
    report_done("pulled", json);
    Ok(())
}

pub(crate) async fn cmd_sync_push<T: RelayTransport>(
    client: &SyncClient<T>,
    json: bool,
) -> Result<()> {
    if client.pairing().is_none() {
        bail!("This device is not paired. Run `boilerfuel sync create` or `boilerfuel sync join`");
    }
    if !client.push_now().await {
        return Err(sync_failure(client, "Push"));
    }
    report_done("pushed", json);
    Ok(())
}

fn report_done(action: &str, json: bool) {
    if json {
        println!("{}", serde_json::json!({ action: true }));
    } else {
        println!("Sync {action}");
    }
}

pub(crate) fn cmd_sync_status(
    store: &Store,
    relay_url: &str,
    show_secret: bool,
    json: bool,
) -> Result<()> {
    #[derive(Serialize)]
    struct StatusReport {
        paired: bool,
        token: Option<String>,
        relay: String,
        last_pull: Option<String>,
    }

    let pairing = store.pairing();
    let watermark = store.watermark();
    let last_pull = (watermark > 0)
        .then(|| Local.timestamp_millis_opt(watermark).single())
        .flatten()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string());

    if show_secret {
        if let Some(ref p) = pairing {
            return print_pairing(p, json);
        }
    }

    let report = StatusReport {
        paired: pairing.is_some(),
        token: pairing.map(|p| p.token),
        relay: relay_url.to_string(),
        last_pull,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match report.token {
        Some(ref token) => println!("Paired:    yes ({token})"),
        None => println!("Paired:    no"),
    }
    println!("Relay:     {}", report.relay);
    if let Some(ref t) = report.last_pull {
        println!("Last sync: {t}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use boilerfuel_core::models::{Macros, MealEntry};
    use boilerfuel_core::relay::{BlobRelay, LocalRelay};

    fn shared_relay() -> Arc<Mutex<BlobRelay>> {
        Arc::new(Mutex::new(BlobRelay::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn create_then_join_copies_log() {
        let relay = shared_relay();

        let store_a = Arc::new(Store::in_memory());
        store_a.log_meal(
            store_a.today(),
            MealEntry::new(Some("wrap".to_string()), "Wrap", 450, Macros::default()),
        );
        let client_a = SyncClient::new(Arc::clone(&store_a), LocalRelay::new(Arc::clone(&relay)));
        cmd_sync_create(&client_a, true).await.unwrap();
        assert!(cmd_sync_create(&client_a, true).await.is_err());
        let pairing = store_a.pairing().unwrap();

        let store_b = Arc::new(Store::in_memory());
        let client_b = SyncClient::new(Arc::clone(&store_b), LocalRelay::new(relay));
        cmd_sync_join(&client_b, &pairing.token.to_lowercase(), &pairing.secret, true)
            .await
            .unwrap();
        assert_eq!(store_b.log(), store_a.log());
        assert_eq!(store_b.pairing(), Some(pairing));
    }

    #[tokio::test]
    async fn join_with_wrong_secret_reports_error() {
        let relay = shared_relay();
        let store_a = Arc::new(Store::in_memory());
        let client_a = SyncClient::new(Arc::clone(&store_a), LocalRelay::new(Arc::clone(&relay)));
        cmd_sync_create(&client_a, true).await.unwrap();
        let token = store_a.pairing().unwrap().token;

        let store_b = Arc::new(Store::in_memory());
        let client_b = SyncClient::new(Arc::clone(&store_b), LocalRelay::new(relay));
        let err = cmd_sync_join(&client_b, &token, "wrongwrongwrong2", true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("wrong secret"));
        assert!(store_b.pairing().is_none());
    }

    #[tokio::test]
    async fn push_requires_pairing() {
        let store = Arc::new(Store::in_memory());
        let client = SyncClient::new(Arc::clone(&store), LocalRelay::in_memory().unwrap());
        assert!(cmd_sync_push(&client, true).await.is_err());
        assert!(cmd_sync_pull(&client, true).await.is_err());
    }

    #[tokio::test]
    async fn unpair_clears_local_pairing() {
        let store = Arc::new(Store::in_memory());
        let client = SyncClient::new(Arc::clone(&store), LocalRelay::in_memory().unwrap());
        cmd_sync_create(&client, true).await.unwrap();
        cmd_sync_unpair(&client, true).await.unwrap();
        assert!(store.pairing().is_none());
        assert_eq!(store.watermark(), 0);
    }

    #[test]
    fn pair_link_format() {
        let pairing = SyncPairing {
            token: "ABC234".to_string(),
            secret: "k7Hm2pQx9wRt4vBn".to_string(),
        };
        assert_eq!(
            pair_link(&pairing),
            "boilerfuel://pair?token=ABC234&secret=k7Hm2pQx9wRt4vBn"
        );
    }

    #[test]
    fn status_on_unpaired_store() {
        let store = Store::in_memory();
        cmd_sync_status(&store, "http://127.0.0.1:8787", true, true).unwrap();
    }
}
