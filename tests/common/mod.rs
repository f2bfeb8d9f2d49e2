#![allow(dead_code)]

pub use scriptagent_test_utils::builders;
pub use scriptagent_test_utils::{init_tracing, with_timeout};

use std::error::Error;
use std::time::Duration;

use scriptagent::scripts::{ScriptService, ScriptStatusResponse};
use scriptagent::types::{ProcessState, ScriptTicket};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Poll `get_status` until the script reports Complete, collecting every
/// log message on the way.
pub async fn wait_until_complete(
    service: &ScriptService,
    ticket: &ScriptTicket,
) -> Result<(ScriptStatusResponse, Vec<String>), Box<dyn Error>> {
    let mut messages = Vec::new();
    let mut cursor = 0;
    for _ in 0..500 {
        let status = service.get_status(ticket, cursor)?;
        cursor = status.next_log_sequence;
        messages.extend(status.logs.iter().map(|l| l.message.clone()));
        if status.state == ProcessState::Complete {
            return Ok((status, messages));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Err(format!("script {ticket} did not complete").into())
}
