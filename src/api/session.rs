use actix_web::{get, web, Responder, Scope};
use base64::Engine;
use serde::Serialize;

use crate::{driver::ChannelState, error::Error, service::Service};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: ChannelState,
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    status: ChannelState,
    challenge_base64: Option<String>,
}

#[get("/status")]
async fn get_status(service: web::Data<Service>) -> Result<impl Responder, Error> {
    Ok(web::Json(StatusResponse {
        status: service.status(),
    }))
}

#[get("/challenge")]
async fn challenge(service: web::Data<Service>) -> Result<impl Responder, Error> {
    let status = service.status();

    if status == ChannelState::Connected {
        return Ok(web::Json(ChallengeResponse {
            status,
            challenge_base64: None,
        }));
    }

    let Some(image) = service.challenge_artifact().await else {
        return Err(Error::not_found("authentication challenge"));
    };

    Ok(web::Json(ChallengeResponse {
        status,
        challenge_base64: Some(base64::engine::general_purpose::STANDARD.encode(image)),
    }))
}

pub fn service() -> Scope {
    web::scope("/session").service(get_status).service(challenge)
}
