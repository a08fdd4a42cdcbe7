use crate::run_id::RunId;

/// Store paths owned by one supervised run.
#[derive(Clone, Debug)]
pub(crate) struct RunPaths {
    root: String,
    state: String,
    messages: String,
    live: String,
}

impl RunPaths {
    pub(crate) fn new(id: &RunId) -> Self {
        Self {
            root: format!("/{id}"),
            state: format!("/{id}/state"),
            messages: format!("/{id}/messages"),
            live: format!("/instances/{id}"),
        }
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    pub(crate) fn state(&self) -> &str {
        &self.state
    }

    pub(crate) fn messages(&self) -> &str {
        &self.messages
    }

    pub(crate) fn message(&self, id: &str) -> String {
        format!("{}/{id}", self.messages)
    }

    pub(crate) fn live(&self) -> &str {
        &self.live
    }
}
