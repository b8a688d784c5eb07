//! Name-keyed task registry
//!
//! Keeps tasks in declaration order. A task registered under an existing
//! name replaces the earlier one wholesale and takes over its slot, so the
//! replacement inherits the original's position for tie-breaking.

use std::collections::HashMap;

use crate::common::{Error, Result};

use super::types::Task;

/// The final set of tasks for a run
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from base tasks, then apply overrides by name
    ///
    /// Every task is validated before it is registered.
    pub fn load(base: Vec<Task>, overrides: Vec<Task>) -> Result<Self> {
        let mut registry = Self::new();
        for task in base {
            registry.insert(task)?;
        }
        for task in overrides {
            if let Some(replaced) = registry.insert(task)? {
                tracing::debug!("Task '{}' overridden", replaced.name);
            }
        }
        Ok(registry)
    }

    /// Register a task, returning the task it replaced
    pub fn insert(&mut self, mut task: Task) -> Result<Option<Task>> {
        task.validate()?;
        match self.index.get(&task.name) {
            Some(&slot) => Ok(Some(std::mem::replace(&mut self.tasks[slot], task))),
            None => {
                self.index.insert(task.name.clone(), self.tasks.len());
                self.tasks.push(task);
                Ok(None)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&slot| &self.tasks[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Declaration position of a task
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// All tasks, in declaration order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Enable or disable a task without removing it from the graph
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let task = self.get_mut(name)?;
        task.disabled = !enabled;
        Ok(())
    }

    /// Merge extra variables into a task's own table
    pub fn override_vars<I>(&mut self, name: &str, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.get_mut(name)?.vars.extend(vars);
        Ok(())
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Task> {
        match self.index.get(name) {
            Some(&slot) => Ok(&mut self.tasks[slot]),
            None => Err(Error::config(name, "name", "no such task")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::types::{Command, ConsoleId};
    use std::time::Duration;

    #[test]
    fn test_load_preserves_declaration_order() {
        let registry = Registry::load(
            vec![Task::new("a"), Task::new("b"), Task::new("c")],
            Vec::new(),
        )
        .unwrap();
        let names: Vec<_> = registry.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_override_replaces_whole_task() {
        let mut base = Task::new("login")
            .on(ConsoleId::Target)
            .requires(["boot"])
            .commands(["root"]);
        base.echo = true;
        base.timeout = Some(Duration::from_secs(9));
        base.vars.insert("USER".into(), "root".into());

        let replacement = Task::new("login").on(ConsoleId::Host).commands(["whoami"]);

        let registry = Registry::load(
            vec![Task::new("boot"), base, Task::new("user")],
            vec![replacement],
        )
        .unwrap();

        let login = registry.get("login").unwrap();
        assert_eq!(login.console, Some(ConsoleId::Host));
        assert!(login.requires.is_empty());
        assert!(!login.echo);
        assert_eq!(login.timeout, None);
        assert!(login.vars.is_empty());
        assert_eq!(login.commands, vec![Command::line("whoami")]);
        assert_eq!(registry.position("login"), Some(1));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_override_of_new_name_is_appended() {
        let registry = Registry::load(vec![Task::new("a")], vec![Task::new("z")]).unwrap();
        assert_eq!(registry.position("z"), Some(1));
    }

    #[test]
    fn test_invalid_task_rejected() {
        let err = Registry::load(vec![Task::new("bad").commands(["ls"])], Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Config { ref task, .. } if task == "bad"));
    }

    #[test]
    fn test_set_enabled_and_override_vars() {
        let mut registry = Registry::load(vec![Task::new("net")], Vec::new()).unwrap();
        registry.set_enabled("net", false).unwrap();
        assert!(registry.get("net").unwrap().disabled);

        registry
            .override_vars("net", [("IFACE".to_string(), "tap0".to_string())])
            .unwrap();
        assert_eq!(registry.get("net").unwrap().vars["IFACE"], "tap0");

        assert!(registry.set_enabled("missing", true).is_err());
    }
}
