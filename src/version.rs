//! Version and build information embedded at compile time

use std::fmt;

/// Build metadata captured by the build script
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: &'static str,
    pub name: &'static str,
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    git_dirty_str: &'static str,
    pub build_timestamp: &'static str,
    pub target: &'static str,
    pub profile: &'static str,
    pub rustc_version: &'static str,
    pub host: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            name: env!("CARGO_PKG_NAME"),
            git_hash: env!("COMMCHECK_GIT_HASH"),
            git_branch: env!("COMMCHECK_GIT_BRANCH"),
            git_dirty_str: env!("COMMCHECK_GIT_DIRTY"),
            build_timestamp: env!("COMMCHECK_BUILD_TIMESTAMP"),
            target: env!("COMMCHECK_TARGET"),
            profile: env!("COMMCHECK_PROFILE"),
            rustc_version: env!("COMMCHECK_RUSTC_VERSION"),
            host: env!("COMMCHECK_HOST"),
        }
    }

    /// Whether the working directory was dirty at build time
    pub fn git_dirty(&self) -> bool {
        self.git_dirty_str == "true"
    }

    /// Full version string, e.g. "0.1.0-abc1234"
    pub fn full_version(&self) -> String {
        if self.git_dirty() {
            format!("{}-{}-dirty", self.version, self.git_hash)
        } else {
            format!("{}-{}", self.version, self.git_hash)
        }
    }

    /// Short version string for log headers
    pub fn short_version(&self) -> String {
        format!("{} ({})", self.version, self.git_hash)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "Build:")?;
        writeln!(
            f,
            "  Git:      {} on {}{}",
            self.git_hash,
            self.git_branch,
            if self.git_dirty() { " (dirty)" } else { "" }
        )?;
        writeln!(f, "  Built:    {}", self.build_timestamp)?;
        writeln!(f, "  Profile:  {}", self.profile)?;
        writeln!(f, "  Target:   {}", self.target)?;
        writeln!(f, "  Host:     {}", self.host)?;
        writeln!(f, "  Compiler: {}", self.rustc_version)?;
        Ok(())
    }
}

/// Get the current build info
pub fn build_info() -> BuildInfo {
    BuildInfo::current()
}

/// Print full version information to stdout
pub fn print_version() {
    print!("{}", build_info());
}
