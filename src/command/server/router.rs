use hyper::{Method, Uri};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::identity::Route;

fn parse_query<T: DeserializeOwned + Default>(params: &str) -> T {
    serde_urlencoded::from_str(params).unwrap_or_default()
}

#[derive(Deserialize, Default)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub fn parse<'a>(method: &Method, uri: &'a Uri) -> Route<'a> {
    let path = uri.path();
    let params = uri.query();

    match path {
        "/healthz" if method == Method::GET => return Route::Healthz,
        "/metrics" if method == Method::GET => return Route::Metrics,
        "/v1/info" if method == Method::GET => return Route::GetInfo,
        "/v1/info/state" if method == Method::GET => return Route::GetState,
        "/v1/info/state" if method == Method::PUT => return Route::PutState,
        "/v1/query" if method == Method::GET || method == Method::POST => return Route::Query,
        "/v1/node" if method == Method::GET => return Route::Node,
        "/oauth2/callback" | "/oauth2/callback/" if method == Method::GET => {
            let query = params
                .map(parse_query::<CallbackQuery>)
                .unwrap_or_default();

            return Route::OAuth2Callback {
                code: query.code,
                state: query.state,
                error: query.error,
            };
        }
        "/ui/login" if method == Method::GET => return Route::UiLogin,
        "/ui/logout" if method == Method::GET => return Route::UiLogout,
        _ => {}
    }

    if path == "/v1/task" || path.starts_with("/v1/task/") {
        return Route::Task { path };
    }

    if let Some(route) = try_parse_oauth2_token(method, path) {
        return route;
    }

    if method == Method::GET {
        if let Some(ui_path) = path.strip_prefix("/ui") {
            if ui_path.is_empty() || ui_path.starts_with('/') {
                return Route::Ui { path: ui_path };
            }
        }
    }

    Route::Unknown
}

fn try_parse_oauth2_token<'a>(method: &Method, path: &'a str) -> Option<Route<'a>> {
    if method != Method::GET {
        return None;
    }

    let path = path.strip_prefix("/oauth2/token/")?;
    if let Some(challenge_id) = path.strip_prefix("initiate/") {
        return is_segment(challenge_id).then_some(Route::OAuth2Initiate { challenge_id });
    }

    is_segment(path).then_some(Route::OAuth2Token { challenge_id: path })
}

fn is_segment(value: &str) -> bool {
    !value.is_empty() && !value.contains('/')
}
