use rand::Rng;
use std::ops::Range;

/// Source of randomness, passed explicitly to whatever needs jitter
#[cfg_attr(test, mockall::automock)]
pub trait Random: Send + Sync {
    fn gen_f64_range(&self, range: Range<f64>) -> f64;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn gen_f64_range(&self, range: Range<f64>) -> f64 {
        rand::thread_rng().gen_range(range)
    }
}
