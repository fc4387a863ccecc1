//! Useful macros.

/// Join the given path components with `/`, producing a `String`. Components that already end in
/// `/` are not given a second one.
///
/// ```ignore
/// assert_eq!(dir!("bftcrdt", "cluster_0.json"), "bftcrdt/cluster_0.json");
/// ```
#[macro_export]
macro_rules! dir {
    ($first:expr $(, $part:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut path = String::from($first);
        $(
            if !path.is_empty() && !path.ends_with('/') {
                path.push('/');
            }
            path.push_str($part);
        )*
        path
    }};
}

/// Time the given expression and push the duration onto `$timers` under `$label`. Evaluates to
/// the value of the expression.
#[macro_export]
macro_rules! time {
    ($timers:ident, $label:expr, $expr:expr) => {{
        let start = std::time::Instant::now();
        let result = $expr;
        let duration = start.elapsed();
        $timers.push(($label, duration));
        result
    }};
}
