// Connector orchestration — lifecycle state, command dispatch, and the
// register/poll worker.

mod dispatch;
pub mod state;
pub mod worker;
