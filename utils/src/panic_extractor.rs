use tokio::task::JoinError;

/// Turns a `JoinError` from a worker task into a loggable message.
pub fn try_extract_panic_message(err: JoinError) -> String {
    if err.is_panic() {
        let panic_message = err.into_panic();
        if let Some(panic_message) = panic_message.downcast_ref::<String>() {
            panic_message.to_string()
        } else if let Some(panic_message) = panic_message.downcast_ref::<&str>() {
            panic_message.to_string()
        } else {
            "Unknown panic message".to_string()
        }
    } else {
        "Cancelled task".to_string()
    }
}
