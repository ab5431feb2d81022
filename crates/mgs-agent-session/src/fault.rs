//! Fault containment for supervised tasks.
//!
//! A supervised future runs on its own task. If it panics, the panic hook
//! records a backtrace at the panic site into a slot scoped to that task, and
//! the supervisor turns the join error into a [`Fault`].

use std::{
    backtrace::Backtrace,
    panic,
    sync::{Arc, Mutex, Once, PoisonError},
};

tokio::task_local! {
    static FAULT_TRACE: Arc<Mutex<Option<String>>>;
}

static INSTALL_HOOK: Once = Once::new();

/// A supervised task that did not complete.
#[derive(Debug)]
pub struct Fault {
    pub message: String,
    /// Backtrace taken at the panic site, when one was recorded.
    pub backtrace: Option<String>,
}

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let _ = FAULT_TRACE.try_with(|slot| {
                let trace = Backtrace::force_capture().to_string();
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(trace);
            });
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `future` on its own task and wait for it.
///
/// # Errors
/// Returns a [`Fault`] if the task panicked or was cancelled.
pub async fn supervise<F>(future: F) -> Result<F::Output, Fault>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    install_hook();
    let slot = Arc::new(Mutex::new(None));

    match tokio::spawn(FAULT_TRACE.scope(Arc::clone(&slot), future)).await {
        Ok(output) => Ok(output),
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(&*e.into_panic())
            } else {
                e.to_string()
            };
            let backtrace = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            Err(Fault { message, backtrace })
        }
    }
}
