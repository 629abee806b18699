use crate::config::Settings;
use crate::detector::OrtDetector;
use crate::labels::ClassLabels;
use crate::model_store::ModelStore;
use crate::server::HttpServer;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Settings) -> Result<(), Box<dyn Error>> {
    let model_store = ModelStore::new(&config.model_store).await;
    let artifact_path = match model_store.fetch_artifact().await {
        Ok(path) => path,
        Err(e) => {
            tracing::error!("Failed to fetch model artifact: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let detector = match OrtDetector::new(&artifact_path, &config.model) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to load model: {:?}", e);
            return Err(Box::new(e));
        }
    };

    // Sessions keep the weights in memory; the artifact file can go.
    drop(artifact_path);

    let labels = match ClassLabels::load(&config.labels) {
        Ok(labels) => Arc::new(labels),
        Err(e) => {
            tracing::error!("Failed to load class labels: {:?}", e);
            return Err(Box::new(e));
        }
    };
    tracing::info!("Loaded {} class labels", labels.len());

    let server = HttpServer::new(detector, labels, &config.server.get_address()).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
