use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, SET_COOKIE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::command::server::auth::USER_HEADER;
use crate::command::server::connection::ConnectionInfo;
use crate::command::server::error::Error;
use crate::command::server::response_body::ResponseBody;
use crate::command::server::{handlers, router, ServerContext};
use crate::metrics_provider::{IN_FLIGHT_REQUESTS, METRICS_PROVIDER};

pub async fn serve_request<S>(
    stream: TokioIo<S>,
    context: Arc<ServerContext>,
    connection: ConnectionInfo,
    timeouts: [Duration; 2],
) where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |mut request| {
            request.extensions_mut().insert(connection.clone());
            handle_request(Arc::clone(&context), request)
        }),
    );
    pin!(conn);

    IN_FLIGHT_REQUESTS.fetch_add(1, Ordering::Relaxed);
    METRICS_PROVIDER.metric_http_request_in_flight.set(
        i64::try_from(IN_FLIGHT_REQUESTS.load(Ordering::Relaxed)).unwrap_or(i64::MAX),
    );

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        debug!("iter = {iter} sleep_duration = {sleep_duration:?}");
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("after polling conn, no error"),
                    Err(error) =>  debug!("error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    IN_FLIGHT_REQUESTS.fetch_sub(1, Ordering::Relaxed);
    METRICS_PROVIDER.metric_http_request_in_flight.set(
        i64::try_from(IN_FLIGHT_REQUESTS.load(Ordering::Relaxed)).unwrap_or(i64::MAX),
    );
}

#[instrument(skip(context, request))]
pub async fn handle_request<B>(
    context: Arc<ServerContext>,
    request: Request<B>,
) -> Result<Response<ResponseBody>, Infallible>
where
    B: Body,
    B::Error: fmt::Display,
{
    let start_time = Instant::now();
    let method = request.method().to_owned();
    let path = request.uri().path().to_owned();
    let route_action = router::parse(request.method(), request.uri()).action_name();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = match route_request(&context, request).await {
        Ok(response) => response,
        Err(error) => error_to_response(&error, trace_id.as_ref()),
    };

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();

    METRICS_PROVIDER
        .metric_http_request_total
        .with_label_values(&[method.as_str(), route_action, status.as_str()])
        .inc();
    METRICS_PROVIDER
        .metric_http_request_duration
        .with_label_values(&[method.as_str(), route_action])
        .observe(elapsed);

    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {path}")
    } else {
        format!("{elapsed:?} - {status} {method} {path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

/// Resource security runs before any handler; handlers only ever see admitted requests.
async fn route_request<B>(
    context: &ServerContext,
    request: Request<B>,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body,
    B::Error: fmt::Display,
{
    let (parts, body) = request.into_parts();
    let route = router::parse(&parts.method, &parts.uri);
    let challenge = context.challenge_context(&parts);

    let identity = context
        .security
        .enforce(route.category(), &parts, &challenge)
        .await?;

    let mut response =
        handlers::dispatch(context, route, &parts, body, identity.as_ref(), &challenge).await?;

    if let Some(identity) = identity {
        if let Ok(user) = HeaderValue::from_str(identity.user()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(USER_HEADER), user);
        }
    }

    Ok(response)
}

pub fn error_to_response(error: &Error, request_id: Option<&String>) -> Response<ResponseBody> {
    let body = error.as_json(request_id).to_string();

    let mut response = Response::new(ResponseBody::fixed(body));
    *response.status_mut() = error.status_code();

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Error::Unauthorized { challenges, .. } = error {
        for challenge in challenges {
            if let Ok(value) = HeaderValue::from_str(&challenge.header) {
                headers.append(WWW_AUTHENTICATE, value);
            }
            for cookie in &challenge.cookies {
                if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                    headers.append(SET_COOKIE, value);
                }
            }
        }
    }

    response
}
