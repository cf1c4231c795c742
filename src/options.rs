//! Thread-local option state and library initialization.
//!
//! Options only affect the calling thread. `use_mmap` is sampled when a
//! product is opened; the other flags are sampled on every operation.

use std::cell::{Cell, RefCell};
use std::env;

use crate::error::{Error, Result};
use crate::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub bypass_special_types: bool,
    pub perform_boundary_checks: bool,
    pub perform_conversions: bool,
    pub use_fast_size_expressions: bool,
    pub use_mmap: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            bypass_special_types: false,
            perform_boundary_checks: true,
            perform_conversions: true,
            use_fast_size_expressions: true,
            use_mmap: true,
        }
    }
}

thread_local! {
    static OPTIONS: Cell<Options> = Cell::new(Options::default());
    static INIT_COUNTER: Cell<u32> = const { Cell::new(0) };
    static DEFINITION_PATH: RefCell<Option<String>> = const { RefCell::new(None) };
}

pub(crate) fn get() -> Options {
    OPTIONS.with(|o| o.get())
}

pub(crate) fn set(options: Options) {
    OPTIONS.with(|o| o.set(options));
}

/// Run `f` with `options` in place, restoring the previous state afterwards.
/// The evaluator uses this to flip a single flag around a sub-read.
pub(crate) fn with_overlay<T>(options: Options, f: impl FnOnce() -> T) -> T {
    let saved = get();
    set(options);
    let result = f();
    set(saved);
    result
}

macro_rules! option_accessors {
    ($($set_fn:ident $get_fn:ident $field:ident),* $(,)?) => {
        $(
            pub fn $set_fn(enable: bool) {
                OPTIONS.with(|o| {
                    let mut options = o.get();
                    options.$field = enable;
                    o.set(options);
                });
            }

            pub fn $get_fn() -> bool {
                OPTIONS.with(|o| o.get().$field)
            }
        )*
    };
}

option_accessors!(
    set_option_bypass_special_types get_option_bypass_special_types bypass_special_types,
    set_option_perform_boundary_checks get_option_perform_boundary_checks perform_boundary_checks,
    set_option_perform_conversions get_option_perform_conversions perform_conversions,
    set_option_use_fast_size_expressions get_option_use_fast_size_expressions use_fast_size_expressions,
    set_option_use_mmap get_option_use_mmap use_mmap,
);

/// Initialize the library for the calling thread. Calls nest; each `init`
/// must be matched by a `done`. Only the first call performs work.
pub fn init() -> Result<()> {
    INIT_COUNTER.with(|c| {
        if c.get() == 0 {
            DEFINITION_PATH.with(|p| {
                let mut path = p.borrow_mut();
                if path.is_none() {
                    if let Ok(value) = env::var("CORAL_DEFINITION") {
                        *path = Some(value);
                    }
                }
            });
            set(Options::default());
        }
        c.set(c.get() + 1);
    });
    Ok(())
}

/// Release library resources for the calling thread. The final `done`
/// clears the definition path. Products must be closed (dropped) first.
pub fn done() {
    INIT_COUNTER.with(|c| {
        if c.get() > 0 {
            c.set(c.get() - 1);
            if c.get() == 0 {
                DEFINITION_PATH.with(|p| *p.borrow_mut() = None);
            }
        }
    });
}

/// Search path for product definition files. Components are separated like
/// the PATH environment variable (';' on Windows, ':' elsewhere).
pub fn set_definition_path(definition_path: &str) -> Result<()> {
    DEFINITION_PATH.with(|p| {
        *p.borrow_mut() = Some(definition_path.to_owned());
    });
    Ok(())
}

/// Set the definition path relative to the location of `file`, searching
/// `searchpath` (or the PATH environment variable when `None`). Does nothing
/// when the `CORAL_DEFINITION` environment variable is set.
pub fn set_definition_path_conditional(
    file: &str,
    searchpath: Option<&str>,
    relative_location: &str,
) -> Result<()> {
    if env::var_os("CORAL_DEFINITION").is_some() {
        return Ok(());
    }
    let searchpath = match searchpath {
        Some(path) => path.to_owned(),
        None => env::var("PATH").map_err(|_| {
            Error::InvalidArgument("no searchpath given and PATH is not set".to_owned())
        })?,
    };
    if let Some(location) = path::find_file(&searchpath, file) {
        let path = path::from_path(&location, true, Some(relative_location));
        set_definition_path(&path)?;
    }
    Ok(())
}

pub fn definition_path() -> Option<String> {
    DEFINITION_PATH.with(|p| p.borrow().clone())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(!options.bypass_special_types);
        assert!(options.perform_boundary_checks);
        assert!(options.perform_conversions);
        assert!(options.use_fast_size_expressions);
        assert!(options.use_mmap);
    }

    #[test]
    fn overlay_restores() {
        set_option_perform_conversions(true);
        let mut overlay = get();
        overlay.perform_conversions = false;
        with_overlay(overlay, || {
            assert!(!get_option_perform_conversions());
        });
        assert!(get_option_perform_conversions());
    }

    #[test]
    fn init_is_counted() {
        init().unwrap();
        init().unwrap();
        done();
        INIT_COUNTER.with(|c| assert_eq!(c.get(), 1));
        done();
        INIT_COUNTER.with(|c| assert_eq!(c.get(), 0));
    }
}
