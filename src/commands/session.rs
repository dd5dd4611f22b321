use crate::error::AppError;
use crate::market::channel::StreamConnector;
use crate::session::SessionContext;
use crate::state::AppState;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub trader_id: Option<String>,
    pub logged_in: bool,
}

impl SessionInfo {
    fn from_session(session: &SessionContext) -> Self {
        let trader_id = session.current();
        Self {
            logged_in: trader_id.is_some(),
            trader_id,
        }
    }
}

pub fn login<C: StreamConnector>(
    state: &AppState<C>,
    trader_id: &str,
) -> Result<SessionInfo, AppError> {
    state.session.login(trader_id)?;
    Ok(SessionInfo::from_session(&state.session))
}

pub fn logout<C: StreamConnector>(state: &AppState<C>) -> SessionInfo {
    state.session.logout();
    SessionInfo::from_session(&state.session)
}

pub fn current_session<C: StreamConnector>(state: &AppState<C>) -> SessionInfo {
    SessionInfo::from_session(&state.session)
}
