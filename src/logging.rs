//! Helper macros enforcing consistent gateway log fields.
//!
//! These macros keep `route` (and optionally `service`) fields present on every log emitted
//! from the dispatch and transport layers so downstream parsing can rely on them.

/// Log an event for a route/service pair plus any extra fields.
#[macro_export]
macro_rules! gateway_event {
    ($level:ident, $target:expr, $event:expr, route = $route:expr, service = $service:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: $target,
            event = $event,
            route = %$route,
            service = %$service,
            $($field = %$value,)*
        )
    };
    ($level:ident, $target:expr, $event:expr, route = $route:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: $target,
            event = $event,
            route = %$route,
            $($field = %$value,)*
        )
    };
}
