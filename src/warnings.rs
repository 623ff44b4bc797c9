use std::sync::atomic::{AtomicBool, Ordering};

use crate::config;

static ENABLED: AtomicBool = AtomicBool::new(true);

pub(crate) enum RuntimeWarning {
    /// (pe, blocks, bytes) still allocated when the world closed
    LeakedAllocations(usize, usize, usize),
    /// pe whose world was dropped without calling close()
    UnclosedWorld(usize),
}

/// Turn runtime warnings back on after [disable_warnings]
pub fn enable_warnings() {
    ENABLED.store(true, Ordering::Relaxed);
}

/// Silence every runtime warning (leaked allocations, unclosed worlds) process wide
pub fn disable_warnings() {
    ENABLED.store(false, Ordering::Relaxed);
}

impl RuntimeWarning {
    fn print_warning(&self) -> bool {
        if ENABLED.load(Ordering::Relaxed) {
            match self {
                RuntimeWarning::LeakedAllocations(_, _, _) => {
                    config().leak_warning.unwrap_or(true)
                }
                RuntimeWarning::UnclosedWorld(_) => true,
            }
        } else {
            false
        }
    }

    #[cfg(feature = "runtime-warnings-panic")]
    fn panic(&self, msg: &str) {
        panic!("{msg}
            Note this warning causes a panic because you have compiled xbrtime with the `runtime-warnings-panic` feature.
            Recompile without this feature to only print warnings, rather than panic.")
    }

    pub(crate) fn print(self) {
        #[cfg(not(feature = "disable-runtime-warnings"))]
        if self.print_warning() {
            let msg = match self {
                RuntimeWarning::LeakedAllocations(pe, blocks, bytes) => {
                    format!("[XBRTIME WARNING][pe {pe}] {blocks} symmetric block(s) ({bytes} bytes) were still allocated at close and have been freed.
                    Every PE must free in the same order it allocated for the heap to stay symmetric. Set XBRTIME_LEAK_WARNING=0 to disable this warning.")
                }
                RuntimeWarning::UnclosedWorld(pe) => {
                    format!("[XBRTIME WARNING][pe {pe}] the world was dropped without calling close(); closing now.
                    close() is collective, every PE must reach it.")
                }
            };

            #[cfg(feature = "runtime-warnings-panic")]
            self.panic(&msg);
            tracing::warn!("{msg}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_can_be_switched_off() {
        assert!(RuntimeWarning::UnclosedWorld(0).print_warning());
        disable_warnings();
        assert!(!RuntimeWarning::UnclosedWorld(0).print_warning());
        assert!(!RuntimeWarning::LeakedAllocations(0, 1, 8).print_warning());
        enable_warnings();
        assert!(RuntimeWarning::UnclosedWorld(0).print_warning());
    }
}
