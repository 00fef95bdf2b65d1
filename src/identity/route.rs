/// Sensitivity class of an endpoint, fixed by the route table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityCategory {
    Public,
    AuthenticatedUser,
    ManagementRead,
    ManagementWrite,
    InternalOnly,
}

impl SecurityCategory {
    pub fn is_management(self) -> bool {
        matches!(
            self,
            SecurityCategory::ManagementRead | SecurityCategory::ManagementWrite
        )
    }
}

/// Route represents the parsed request path and action.
#[derive(Debug, PartialEq)]
pub enum Route<'a> {
    Healthz,
    Metrics,
    GetInfo,
    GetState,
    PutState,
    Query,
    Node,
    Task {
        path: &'a str,
    },
    OAuth2Initiate {
        challenge_id: &'a str,
    },
    OAuth2Token {
        challenge_id: &'a str,
    },
    OAuth2Callback {
        code: Option<String>,
        state: Option<String>,
        error: Option<String>,
    },
    UiLogin,
    UiLogout,
    Ui {
        path: &'a str,
    },
    Unknown,
}

impl Route<'_> {
    pub fn category(&self) -> SecurityCategory {
        match self {
            Route::Healthz
            | Route::GetInfo
            | Route::GetState
            | Route::OAuth2Initiate { .. }
            | Route::OAuth2Token { .. }
            | Route::OAuth2Callback { .. }
            | Route::UiLogin
            | Route::UiLogout => SecurityCategory::Public,
            Route::Query | Route::Ui { .. } | Route::Unknown => {
                SecurityCategory::AuthenticatedUser
            }
            Route::Node | Route::Metrics => SecurityCategory::ManagementRead,
            Route::PutState => SecurityCategory::ManagementWrite,
            Route::Task { .. } => SecurityCategory::InternalOnly,
        }
    }

    pub fn action_name(&self) -> &'static str {
        match self {
            Route::Healthz => "healthz",
            Route::Metrics => "metrics",
            Route::GetInfo => "get-info",
            Route::GetState => "get-state",
            Route::PutState => "put-state",
            Route::Query => "query",
            Route::Node => "list-nodes",
            Route::Task { .. } => "task",
            Route::OAuth2Initiate { .. } => "oauth2-initiate",
            Route::OAuth2Token { .. } => "oauth2-token",
            Route::OAuth2Callback { .. } => "oauth2-callback",
            Route::UiLogin => "ui-login",
            Route::UiLogout => "ui-logout",
            Route::Ui { .. } => "ui",
            Route::Unknown => "unknown",
        }
    }
}
