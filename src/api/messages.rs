use actix_web::{get, post, web, Responder, Scope};
use serde::{Deserialize, Serialize};

use crate::{error::Error, service::Service};

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    recipient: String,
    #[serde(default)]
    body: String,
    attachment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    id: i64,
}

#[post("")]
async fn enqueue(
    service: web::Data<Service>,
    payload: web::Json<EnqueueRequest>,
) -> Result<impl Responder, Error> {
    let req = payload.into_inner();

    if req.recipient.trim().is_empty() {
        return Err(Error::invalid_parameter("recipient must not be empty"));
    }

    if req.body.trim().is_empty() && req.attachment.is_none() {
        return Err(Error::invalid_parameter(
            "body may be empty only when an attachment is present",
        ));
    }

    let id = service
        .enqueue(&req.recipient, &req.body, req.attachment.as_deref())
        .await?;

    Ok(web::Json(EnqueueResponse { id }))
}

#[get("/{id}")]
async fn get_message(
    service: web::Data<Service>,
    path: web::Path<i64>,
) -> Result<impl Responder, Error> {
    let message = service.message(*path).await?;

    Ok(web::Json(message))
}

pub fn service() -> Scope {
    web::scope("/messages").service(enqueue).service(get_message)
}
