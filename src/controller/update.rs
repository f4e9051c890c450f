use std::str::FromStr;

use actix_web::{get, web, Responder, Result};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    configuration::{AppState, State},
    error::Error,
    model::{EntityKind, Exchange},
    provider::{start_sync, RunOptions},
};

#[get("/update/{exchange}/{entity}")]
async fn index(
    state: web::Data<AppState<State>>,
    path: web::Path<(String, String)>,
) -> Result<impl Responder, Error> {
    let (exchange, entity) = path.into_inner();
    Ok(web::Json(
        update(state.as_ref(), &exchange, &entity, None).await,
    ))
}

#[get("/update/{exchange}/{entity}/{min_liquidity}")]
async fn with_min_liquidity(
    state: web::Data<AppState<State>>,
    path: web::Path<(String, String, String)>,
) -> Result<impl Responder, Error> {
    let (exchange, entity, min_liquidity) = path.into_inner();
    Ok(web::Json(
        update(state.as_ref(), &exchange, &entity, Some(&min_liquidity)).await,
    ))
}

async fn update(
    state: &AppState<State>,
    exchange: &str,
    entity: &str,
    min_liquidity: Option<&str>,
) -> Response {
    match run(state, exchange, entity, min_liquidity).await {
        Ok(()) => Response {
            success: true,
            exception: None,
        },
        Err(e) => {
            error!("Update {}/{} failed: {}", exchange, entity, e);
            Response {
                success: false,
                exception: Some(e.to_string()),
            }
        },
    }
}

async fn run(
    state: &AppState<State>,
    exchange: &str,
    entity: &str,
    min_liquidity: Option<&str>,
) -> Result<(), Error> {
    let exchange = Exchange::from_str(&exchange.to_uppercase())?;
    let kind = EntityKind::from_str(entity)?;

    let mut options = RunOptions::new(state.config.batch_size);
    options.min_liquidity =
        min_liquidity.map(BigDecimal::from_str).transpose()?;

    start_sync(state.clone(), exchange, kind, options).await?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub exception: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{configuration::tests::test_config, dao::MemorySink};
    use std::sync::Arc;

    fn app_state() -> AppState<State> {
        AppState::new(State::with_sink(test_config(), Arc::new(MemorySink::new())))
    }

    #[tokio::test]
    async fn test_pools_without_min_liquidity_fail() {
        let response = update(&app_state(), "uni_v2", "pools", None).await;

        assert!(!response.success);
        assert!(response.exception.unwrap().contains("min_liquidity"));
    }

    #[tokio::test]
    async fn test_unknown_exchange_fails() {
        let response = update(&app_state(), "curve", "snaps", None).await;

        assert!(!response.success);
        assert!(response.exception.is_some());
    }

    #[tokio::test]
    async fn test_unknown_entity_fails() {
        let response = update(&app_state(), "sushi", "trades", None).await;

        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_overlapping_update_is_rejected() {
        let state = app_state();
        let _running = state
            .streams
            .try_acquire(Exchange::UNI_V2, EntityKind::Snaps)
            .await
            .unwrap();

        let response = update(&state, "UNI_V2", "snaps", None).await;

        assert!(!response.success);
        assert_eq!(
            response.exception.as_deref(),
            Some("UNI_V2 snaps already running")
        );
    }

    #[test]
    fn test_response_shape() {
        let response = Response {
            success: false,
            exception: None,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "success": false, "exception": null })
        );
    }
}
