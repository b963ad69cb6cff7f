use std::ffi::OsStr;

/// Settings read from the process environment, merged with CLI flags by the binary.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Env {
    /// `LANVM_TRACE=1`
    pub trace: bool,
    /// `LANVM_MINIMAL=1`
    pub minimal: bool,
}

impl Env {
    pub fn from_vars() -> Self {
        Env {
            trace: var_is("LANVM_TRACE", "1"),
            minimal: var_is("LANVM_MINIMAL", "1"),
        }
    }
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_var_is_false() {
        assert!(!var_is("LANVM_SURELY_UNSET_VARIABLE", "1"));
    }
}
