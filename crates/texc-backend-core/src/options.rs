//! Code generation options.

use std::env;
use std::fmt;
use std::path::PathBuf;

/// Optimization level handed to the native compiler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    /// No optimization.
    O0,
    /// Basic optimization.
    O1,
    /// Standard optimization.
    O2,
    /// Aggressive optimization, including inlining and loop/SLP
    /// vectorization.
    #[default]
    O3,
}

impl OptLevel {
    /// The compiler flag for this level.
    pub fn flag(self) -> &'static str {
        match self {
            Self::O0 => "-O0",
            Self::O1 => "-O1",
            Self::O2 => "-O2",
            Self::O3 => "-O3",
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::O0 => "O0",
            Self::O1 => "O1",
            Self::O2 => "O2",
            Self::O3 => "O3",
        })
    }
}

/// Options shared by the compiling backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Optimization level for the native compiler.
    pub opt_level: OptLevel,
    /// C compiler to invoke instead of `$CC` or `cc`.
    pub compiler: Option<PathBuf>,
    /// Extra flags appended to the compiler command line.
    pub extra_flags: Vec<String>,
    /// Keep generated sources on disk after the build.
    pub keep_source: bool,
    /// CUDA device ordinal.
    pub device_ordinal: usize,
    /// NVRTC target architecture, e.g. `sm_70`. `None` lets NVRTC pick.
    pub gpu_arch: Option<String>,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::O3,
            compiler: None,
            extra_flags: Vec::new(),
            keep_source: false,
            device_ordinal: 0,
            gpu_arch: None,
        }
    }
}

impl CodegenOptions {
    /// Defaults overridden by `CC` and `TEXC_KEEP_SOURCE`.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(cc) = env::var_os("CC").filter(|cc| !cc.is_empty()) {
            opts.compiler = Some(PathBuf::from(cc));
        }
        if let Ok(keep) = env::var("TEXC_KEEP_SOURCE") {
            opts.keep_source = matches!(keep.as_str(), "1" | "true" | "yes");
        }
        opts
    }

    /// The compiler to run: the override, then `$CC`, then `cc`.
    pub fn compiler_path(&self) -> PathBuf {
        self.compiler
            .clone()
            .or_else(|| env::var_os("CC").filter(|cc| !cc.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("cc"))
    }
}

impl fmt::Display for CodegenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodegenOptions {{ opt_level: {}", self.opt_level)?;
        if let Some(cc) = &self.compiler {
            write!(f, ", compiler: {}", cc.display())?;
        }
        if !self.extra_flags.is_empty() {
            write!(f, ", extra_flags: [{}]", self.extra_flags.join(" "))?;
        }
        write!(
            f,
            ", keep_source: {}, device: {}",
            self.keep_source, self.device_ordinal
        )?;
        if let Some(arch) = &self.gpu_arch {
            write!(f, ", gpu_arch: {arch}")?;
        }
        f.write_str(" }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_aggressive() {
        let opts = CodegenOptions::default();
        assert_eq!(opts.opt_level, OptLevel::O3);
        assert_eq!(opts.opt_level.flag(), "-O3");
        assert!(!opts.keep_source);
    }

    #[test]
    fn display() {
        let opts = CodegenOptions {
            opt_level: OptLevel::O1,
            extra_flags: vec!["-march=native".into()],
            gpu_arch: Some("sm_80".into()),
            ..Default::default()
        };
        assert_eq!(
            opts.to_string(),
            "CodegenOptions { opt_level: O1, extra_flags: [-march=native], keep_source: false, device: 0, gpu_arch: sm_80 }"
        );
    }

    #[test]
    fn explicit_compiler_wins() {
        let opts = CodegenOptions {
            compiler: Some("/opt/bin/clang".into()),
            ..Default::default()
        };
        assert_eq!(opts.compiler_path(), PathBuf::from("/opt/bin/clang"));
    }
}
