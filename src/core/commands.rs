use crate::core::traits::ToolCommand;
use std::sync::Arc;

/// Commands exposed by one GitShu version, in declaration order
#[derive(Clone, Default)]
pub struct CommandTable {
    commands: Vec<Arc<dyn ToolCommand>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command; a later command with the same name replaces the earlier one
    pub fn register(&mut self, command: Arc<dyn ToolCommand>) {
        self.commands.retain(|existing| existing.name() != command.name());
        self.commands.push(command);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolCommand>> {
        self.commands
            .iter()
            .find(|command| command.name() == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ToolCommand>> {
        self.commands.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FromIterator<Arc<dyn ToolCommand>> for CommandTable {
    fn from_iter<I: IntoIterator<Item = Arc<dyn ToolCommand>>>(iter: I) -> Self {
        let mut table = CommandTable::new();
        for command in iter {
            table.register(command);
        }
        table
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::traits::{CommandOption, Flags};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Command that echoes its input and counts invocations
    pub(crate) struct EchoCommand {
        pub name: String,
        pub calls: AtomicUsize,
        pub options: Vec<CommandOption>,
    }

    impl EchoCommand {
        pub(crate) fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls: AtomicUsize::new(0),
                options: Vec::new(),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolCommand for EchoCommand {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "echo input"
        }

        fn options(&self) -> &[CommandOption] {
            &self.options
        }

        async fn exec(&self, args: &[String], flags: &Flags) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "args": args, "flags": flags }))
        }
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut table = CommandTable::new();
        table.register(EchoCommand::new("build"));
        table.register(EchoCommand::new("serve"));
        table.register(EchoCommand::new("build"));

        assert_eq!(table.len(), 2);
        assert_eq!(table.names(), vec!["serve", "build"]);
        assert!(table.get("serve").is_some());
        assert!(table.get("init").is_none());
    }
}
