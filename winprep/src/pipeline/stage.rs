use super::task::BoxedTask;

/// A labelled group of tasks executed in order.
pub struct Stage<Ctx> {
    pub label: &'static str,
    pub tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> Stage<Ctx> {
    pub fn new(label: &'static str, tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { label, tasks }
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }
}
