//! Per-request context variable (§4.4 step 4, §9 Design Notes).
//!
//! The source stashes the current JSON-RPC request id in a
//! `contextvars.ContextVar` so any code running underneath a handler —
//! logging, nested calls — can read it without threading it through every
//! signature. `tokio::task_local!` is the async-native equivalent: it's
//! visible to everything awaited from within the scope it's set in, and
//! distinct dispatcher tasks never see each other's value.

use uuid::Uuid;

tokio::task_local! {
    static JSONRPC_ID: Uuid;
}

/// Run `f` with `id` bound as the current request's JSON-RPC id.
pub async fn scope<F, Fut, T>(id: Uuid, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    JSONRPC_ID.scope(id, f()).await
}

/// The current request's JSON-RPC id, if called from within [`scope`].
pub fn current_jsonrpc_id() -> Option<Uuid> {
    JSONRPC_ID.try_with(|id| *id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn id_is_visible_inside_scope_and_absent_outside() {
        assert_eq!(current_jsonrpc_id(), None);

        let id = Uuid::new_v4();
        let observed = scope(id, || async { current_jsonrpc_id() }).await;
        assert_eq!(observed, Some(id));

        assert_eq!(current_jsonrpc_id(), None);
    }

    #[tokio::test]
    async fn nested_tasks_do_not_leak_into_each_other() {
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();

        let (a, b) = tokio::join!(
            scope(id_a, || async { current_jsonrpc_id() }),
            scope(id_b, || async { current_jsonrpc_id() }),
        );
        assert_eq!(a, Some(id_a));
        assert_eq!(b, Some(id_b));
    }
}
