/// Git metadata emitted by `build.rs`, absent when built outside a checkout.
pub(crate) struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    pub git_dirty: Option<&'static str>,
}

impl BuildInfo {
    pub fn is_dirty(&self) -> bool {
        self.git_dirty == Some("true")
    }
}

pub(crate) const BUILD_INFO: BuildInfo = BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    git_dirty: option_env!("VERGEN_GIT_DIRTY"),
};
