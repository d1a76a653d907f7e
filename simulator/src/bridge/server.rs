use crate::bridge::model::SnapshotModel;
use anyhow::Context;
use serde_json::json;
use std::net::SocketAddr;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};
use windowcore::patient_interface::MedicalEvent;
use windowcore::prelude::{DisplayWindow, LoaderError};
use windowcore::LoaderHandle;

fn status_for(error: &LoaderError) -> StatusCode {
    match error {
        LoaderError::InvalidRange(_) => StatusCode::BAD_REQUEST,
        LoaderError::NotInitialized | LoaderError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// HTTP endpoint letting an external chart drive a running loader.
pub struct ChartBridge {
    handle: LoaderHandle<MedicalEvent>,
}

impl ChartBridge {
    pub fn new(handle: LoaderHandle<MedicalEvent>) -> Self {
        Self { handle }
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let handle = self.handle.clone();
        let handle_filter = warp::any().map(move || handle.clone());

        let snapshot_route = warp::path("snapshot")
            .and(warp::path::end())
            .and(warp::get())
            .and(handle_filter.clone())
            .map(|handle: LoaderHandle<MedicalEvent>| {
                let model = SnapshotModel::from_snapshot(&handle.snapshot(), handle.metrics());
                warp::reply::json(&model)
            });

        let window_route = warp::path("window")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .and(handle_filter)
            .and_then(
                |window: DisplayWindow, handle: LoaderHandle<MedicalEvent>| async move {
                    let reply = match handle.request_window(window).await {
                        Ok(loaded) => warp::reply::with_status(
                            warp::reply::json(&json!({ "loaded": loaded })),
                            StatusCode::OK,
                        ),
                        Err(err) => {
                            log::warn!("window request {:?} failed: {}", window, err);
                            warp::reply::with_status(
                                warp::reply::json(&json!({ "error": err.to_string() })),
                                status_for(&err),
                            )
                        }
                    };
                    Ok::<_, Rejection>(reply)
                },
            );

        snapshot_route.or(window_route)
    }

    /// Serves until Ctrl+C.
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    log::error!("waiting for Ctrl+C failed: {}", err);
                }
            })
            .with_context(|| format!("binding chart bridge to {}", addr))?;
        log::info!("chart bridge listening on {}", bound);
        server.await;
        Ok(())
    }
}
