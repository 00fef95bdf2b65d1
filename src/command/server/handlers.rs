use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
use hyper::http::request::Parts;
use hyper::{Method, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use tracing::{debug, instrument};

use crate::command::server::auth::oauth2::{
    CallbackOutcome, CallbackRequest, TokenPoll, NONCE_COOKIE,
};
use crate::command::server::auth::{ChallengeContext, OAuth2Service};
use crate::command::server::cookie::SetCookie;
use crate::command::server::error::Error;
use crate::command::server::http_server::error_to_response;
use crate::command::server::request_ext::HeaderExt;
use crate::command::server::response_body::ResponseBody;
use crate::command::server::server_context::{NodeState, ServerContext};
use crate::identity::{Identity, Route};
use crate::metrics_provider::METRICS_PROVIDER;

const UI_HOME: &str = "/ui/";

const CALLBACK_SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Coordinator</title></head>
<body><p>Authentication successful. You may close this window.</p></body>
</html>
"#;

const UI_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Coordinator</title></head>
<body><p>Coordinator web UI</p><p><a href="/ui/logout">Log out</a></p></body>
</html>
"#;

pub async fn dispatch<B>(
    context: &ServerContext,
    route: Route<'_>,
    parts: &Parts,
    body: B,
    identity: Option<&Identity>,
    challenge: &ChallengeContext,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body,
    B::Error: fmt::Display,
{
    match route {
        Route::Healthz => handle_healthz(),
        Route::Metrics => handle_metrics(),
        Route::GetInfo => handle_get_info(context).await,
        Route::GetState => json_response(StatusCode::OK, &context.state().await),
        Route::PutState => handle_put_state(context, body).await,
        Route::Query => handle_query(authenticated(identity)?),
        Route::Node => handle_list_nodes(context).await,
        Route::Task { path } => handle_task(context, authenticated(identity)?, path),
        Route::OAuth2Initiate { challenge_id } => {
            handle_oauth2_initiate(context, challenge_id, challenge).await
        }
        Route::OAuth2Token { challenge_id } => {
            handle_oauth2_token(context, challenge_id, parts, challenge).await
        }
        Route::OAuth2Callback { code, state, error } => {
            let nonce = parts.cookie(NONCE_COOKIE);
            let request = CallbackRequest {
                code: code.as_deref(),
                state: state.as_deref(),
                error: error.as_deref(),
                nonce: nonce.as_deref(),
            };
            handle_oauth2_callback(context, request, challenge).await
        }
        Route::UiLogin => handle_ui_login(context, challenge).await,
        Route::UiLogout => handle_ui_logout(context, challenge),
        Route::Ui { path } => handle_ui(context, path),
        Route::Unknown => handle_unknown_route(parts),
    }
}

/// The enforcer resolves an identity for every non-public route.
fn authenticated(identity: Option<&Identity>) -> Result<&Identity, Error> {
    identity.ok_or_else(|| Error::Internal("Missing identity for authenticated route".to_string()))
}

fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<ResponseBody>, Error> {
    let body = serde_json::to_vec(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize response: {e}")))?;

    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(ResponseBody::fixed(body))?)
}

fn html_response(
    status: StatusCode,
    page: &'static str,
    cookies: &[SetCookie],
) -> Result<Response<ResponseBody>, Error> {
    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/html; charset=utf-8");
    for cookie in cookies {
        builder = builder.header(SET_COOKIE, cookie.to_string());
    }

    Ok(builder.body(ResponseBody::fixed(page))?)
}

fn redirect(location: &str, cookies: &[SetCookie]) -> Result<Response<ResponseBody>, Error> {
    let mut builder = Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(LOCATION, location);
    for cookie in cookies {
        builder = builder.header(SET_COOKIE, cookie.to_string());
    }

    Ok(builder.body(ResponseBody::empty())?)
}

fn handle_healthz() -> Result<Response<ResponseBody>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(ResponseBody::fixed(r#"{"status":"ok"}"#))?)
}

fn handle_metrics() -> Result<Response<ResponseBody>, Error> {
    let (content_type, metrics) = METRICS_PROVIDER.gather()?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(ResponseBody::fixed(metrics))?)
}

async fn handle_get_info(context: &ServerContext) -> Result<Response<ResponseBody>, Error> {
    let node = &context.node;
    let info = json!({
        "nodeId": node.node_id,
        "nodeVersion": { "version": node.version },
        "environment": node.environment,
        "coordinator": true,
        "starting": false,
        "uptime": format!("{:.2}s", node.started_at.elapsed().as_secs_f64()),
        "state": context.state().await,
    });

    json_response(StatusCode::OK, &info)
}

#[instrument(skip(context, body))]
async fn handle_put_state<B>(
    context: &ServerContext,
    body: B,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body,
    B::Error: fmt::Display,
{
    let body = body
        .collect()
        .await
        .map_err(|e| Error::BadRequest(format!("Unable to read request body: {e}")))?
        .to_bytes();

    let body = std::str::from_utf8(&body)
        .map_err(|_| Error::BadRequest("Request body is not valid UTF-8".to_string()))?;
    let target = body.parse::<NodeState>()?;

    let state = context.set_state(target).await?;
    json_response(StatusCode::OK, &state)
}

fn handle_query(identity: &Identity) -> Result<Response<ResponseBody>, Error> {
    json_response(StatusCode::OK, identity)
}

async fn handle_list_nodes(context: &ServerContext) -> Result<Response<ResponseBody>, Error> {
    let nodes = json!([{
        "nodeId": context.node.node_id,
        "nodeVersion": { "version": context.node.version },
        "coordinator": true,
        "state": context.state().await,
    }]);

    json_response(StatusCode::OK, &nodes)
}

fn handle_task(
    context: &ServerContext,
    identity: &Identity,
    path: &str,
) -> Result<Response<ResponseBody>, Error> {
    debug!("Task request from node '{}' for {path}", identity.user());
    let task = json!({
        "nodeId": context.node.node_id,
        "caller": identity.user(),
        "path": path,
    });

    json_response(StatusCode::OK, &task)
}

fn oauth2_service(context: &ServerContext) -> Result<&OAuth2Service, Error> {
    context
        .oauth2
        .as_deref()
        .ok_or_else(|| Error::NotFound("OAuth2 authentication is not configured".to_string()))
}

async fn handle_oauth2_initiate(
    context: &ServerContext,
    challenge_id: &str,
    challenge: &ChallengeContext,
) -> Result<Response<ResponseBody>, Error> {
    let service = oauth2_service(context)?;

    match service.initiate(challenge_id, challenge).await {
        Some(redirect_to) => redirect(&redirect_to.location, &redirect_to.cookies),
        None => Err(Error::unauthorized("OAuth2 challenge is invalid or expired")),
    }
}

async fn handle_oauth2_token(
    context: &ServerContext,
    challenge_id: &str,
    parts: &Parts,
    challenge: &ChallengeContext,
) -> Result<Response<ResponseBody>, Error> {
    let service = oauth2_service(context)?;

    match service.poll_token(challenge_id).await {
        TokenPoll::Token(token) => json_response(StatusCode::OK, &json!({ "token": token })),
        TokenPoll::Failed(reason) => json_response(StatusCode::OK, &json!({ "error": reason })),
        TokenPoll::Pending => {
            let next_uri = format!("{}{}", challenge.base_uri, parts.uri.path());
            json_response(StatusCode::OK, &json!({ "nextUri": next_uri }))
        }
        TokenPoll::Unknown => Err(Error::NotFound("Unknown OAuth2 challenge".to_string())),
    }
}

async fn handle_oauth2_callback(
    context: &ServerContext,
    request: CallbackRequest<'_>,
    challenge: &ChallengeContext,
) -> Result<Response<ResponseBody>, Error> {
    let service = oauth2_service(context)?;
    let response = service.handle_callback(request, challenge).await;

    match response.outcome {
        CallbackOutcome::Authenticated { ui: true } => redirect(UI_HOME, &response.cookies),
        CallbackOutcome::Authenticated { ui: false } => {
            html_response(StatusCode::OK, CALLBACK_SUCCESS_PAGE, &response.cookies)
        }
        CallbackOutcome::Rejected { reason } => {
            let mut rejected = error_to_response(&Error::unauthorized(reason), None);
            for cookie in &response.cookies {
                rejected
                    .headers_mut()
                    .append(SET_COOKIE, cookie.to_string().parse()?);
            }
            Ok(rejected)
        }
    }
}

async fn handle_ui_login(
    context: &ServerContext,
    challenge: &ChallengeContext,
) -> Result<Response<ResponseBody>, Error> {
    if !context.web_ui_enabled {
        return Err(Error::NotFound("Web UI is disabled".to_string()));
    }

    let Some(service) = context.oauth2.as_deref() else {
        return redirect(UI_HOME, &[]);
    };

    let redirect_to = service
        .start_ui_login(challenge)
        .await
        .ok_or_else(|| Error::Internal("Unable to start OAuth2 login".to_string()))?;
    redirect(&redirect_to.location, &redirect_to.cookies)
}

fn handle_ui_logout(
    context: &ServerContext,
    challenge: &ChallengeContext,
) -> Result<Response<ResponseBody>, Error> {
    if !context.web_ui_enabled {
        return Err(Error::NotFound("Web UI is disabled".to_string()));
    }

    redirect(
        UI_HOME,
        &[OAuth2Service::ui_cookie_cleared(challenge.secure)],
    )
}

fn handle_ui(context: &ServerContext, path: &str) -> Result<Response<ResponseBody>, Error> {
    if !context.web_ui_enabled {
        return Err(Error::NotFound("Web UI is disabled".to_string()));
    }

    match path {
        "" => redirect(UI_HOME, &[]),
        "/" | "/index.html" => html_response(StatusCode::OK, UI_PAGE, &[]),
        _ => Err(Error::NotFound(format!("UI resource not found: {path}"))),
    }
}

fn handle_unknown_route(parts: &Parts) -> Result<Response<ResponseBody>, Error> {
    if [Method::GET, Method::HEAD].contains(&parts.method) {
        let msg = format!("unknown route: {} {}", parts.method, parts.uri.path());
        Err(Error::NotFound(msg))
    } else {
        let msg = format!("unsupported route: {} {}", parts.method, parts.uri.path());
        Err(Error::BadRequest(msg))
    }
}
