use crate::prelude::*;
use rand::Rng;

/// Waits for `n_cycles` rising edges of `clk`.
pub async fn clock_cycles(clk: SimObject, n_cycles: u32) -> TbResult {
    for _ in 0..n_cycles {
        clk.rising_edge().await;
    }
    Ok(Val::None)
}

/// Returns once `signal` holds `value`, immediately if it already does.
pub async fn wait_for_value(signal: SimObject, value: u64) {
    while signal.u64() != value {
        signal.edge().await;
    }
}

/// Random register word.
#[inline]
pub fn rand_word() -> u32 {
    rand::thread_rng().gen()
}
