/// Image config accumulated between unpacks and baked into the next tag.
///
/// Never persisted; the controller resets it on construction and after a
/// successful tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingConfig {
    pub entrypoint_args: Vec<String>,
}

impl PendingConfig {
    pub fn is_empty(&self) -> bool {
        self.entrypoint_args.is_empty()
    }

    pub fn clear(&mut self) {
        self.entrypoint_args.clear();
    }

    /// `--config.cmd=<arg>` flags in argument order.
    pub fn config_cmd_flags(&self) -> Vec<String> {
        self.entrypoint_args
            .iter()
            .map(|arg| format!("--config.cmd={arg}"))
            .collect()
    }
}
