/// Checks a fully materialized statement before it is executed.
///
/// An interface declares at most one validator; it is constructed once per
/// dispatcher and shared by every method of that interface.
pub trait Validator: Send + Sync {
    fn verify(&self, sql: &str) -> bool;
}

impl<F> Validator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn verify(&self, sql: &str) -> bool {
        self(sql)
    }
}
