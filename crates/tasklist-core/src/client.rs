//! The task-list controller.
//!
//! [`TaskListClient`] owns an explicit [`AppState`] and exposes one method per
//! user action. Every action that reaches the service collapses its failure
//! into a single message in [`AppState::error`]; nothing is retried and
//! nothing is rolled back. Mutations are followed by a full refetch of the
//! list, so the displayed collection is always a server snapshot.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, error, info, instrument, warn};

use crate::api::TaskApi;
use crate::error::ClientError;
use crate::export;
use crate::storage::{KeyValueStore, clear_user, load_user, save_user};
use crate::task::{LoginRequest, NewTask, RegisterRequest, Task, TaskStatus, TaskUpdate, User};

pub const NOT_LOGGED_IN: &str = "Please log in first.";
pub const ALREADY_LOGGED_IN: &str = "Already logged in. Log out first.";
pub const FETCH_FAILED: &str = "Failed to fetch tasks. Please try again later.";
pub const EMAIL_REQUIRED: &str = "Please enter your email.";
pub const EMAIL_AND_USERNAME_REQUIRED: &str = "Please enter both email and username.";
pub const LOGIN_FAILED: &str = "Login failed. Please try again.";
pub const REGISTER_FAILED: &str = "Registration failed. Please try again.";
pub const LOGOUT_FAILED: &str = "Failed to log out. Please try again.";
pub const TASK_TEXT_REQUIRED: &str = "Task title and description cannot be empty!";
pub const ADD_FAILED: &str = "Failed to add task. Please try again.";
pub const UPDATE_FAILED: &str = "Failed to update task. Please try again.";
pub const DELETE_FAILED: &str = "Failed to delete task. Please try again.";
pub const NO_CANCELLED_SELECTED: &str =
    "Only cancelled tasks can be deleted. Select at least one cancelled task.";
pub const BULK_DELETE_FAILED: &str = "Some tasks could not be deleted. Please try again.";

/// Which form is showing while logged out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthView {
    #[default]
    Login,
    Register,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewTaskForm {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub user: Option<User>,
    pub auth_view: AuthView,
    pub tasks: Vec<Task>,
    pub loading: bool,
    pub error: Option<String>,
    pub new_task: NewTaskForm,
    pub selected: BTreeSet<i64>,
    pub pending_delete: Vec<i64>,
    pub confirm_open: bool,
}

impl AppState {
    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_selected(&self, task_id: i64) -> bool {
        self.selected.contains(&task_id)
    }
}

/// Result of one delete issued by [`TaskListClient::confirm_bulk_delete`].
#[derive(Debug)]
pub struct DeleteOutcome {
    pub task_id: i64,
    pub result: Result<(), ClientError>,
}

impl DeleteOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct TaskListClient<A, S> {
    api: A,
    store: S,
    state: AppState,
}

impl<A, S> TaskListClient<A, S>
where
    A: TaskApi,
    S: KeyValueStore,
{
    pub fn new(api: A, store: S) -> Self {
        Self {
            api,
            store,
            state: AppState::default(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Picks up a user persisted by an earlier session. Presence of the entry
    /// is taken as proof of login.
    #[instrument(skip(self))]
    pub fn restore_session(&mut self) -> anyhow::Result<bool> {
        let user = load_user(&self.store)?;
        let restored = user.is_some();
        if let Some(user) = user {
            info!(user_id = user.id, "resuming session");
            self.state.user = Some(user);
        }
        Ok(restored)
    }

    /// Start-up sequence: restore the session and, when logged in, load the
    /// task list.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.restore_session()? {
            self.fetch_tasks().await;
        }
        Ok(())
    }

    pub fn show_login(&mut self) {
        self.state.auth_view = AuthView::Login;
    }

    pub fn show_register(&mut self) {
        self.state.auth_view = AuthView::Register;
    }

    pub fn toggle_auth_view(&mut self) {
        self.state.auth_view = match self.state.auth_view {
            AuthView::Login => AuthView::Register,
            AuthView::Register => AuthView::Login,
        };
    }

    pub fn dismiss_error(&mut self) {
        self.state.error = None;
    }

    #[instrument(skip(self))]
    pub async fn fetch_tasks(&mut self) {
        let Some(user_id) = self.require_user() else {
            return;
        };

        self.state.loading = true;
        self.state.error = None;

        match self.api.list_tasks(user_id).await {
            Ok(tasks) => {
                debug!(user_id, count = tasks.len(), "replacing task list");
                self.state.tasks = tasks;
                self.state.selected.clear();
                self.retain_pending_delete();
            }
            Err(err) => {
                warn!(user_id, error = %err, "fetching tasks failed");
                self.state.error = Some(FETCH_FAILED.to_string());
            }
        }

        self.state.loading = false;
    }

    #[instrument(skip(self))]
    pub async fn login(&mut self, email: &str) {
        if self.reject_if_logged_in() {
            return;
        }
        if email.trim().is_empty() {
            self.report(ClientError::Validation(EMAIL_REQUIRED.to_string()), LOGIN_FAILED);
            return;
        }
        self.state.error = None;

        let request = LoginRequest {
            email: email.trim().to_string(),
        };
        match self.api.login(&request).await {
            Ok(user) => self.sign_in(user).await,
            Err(err) => self.report_auth_failure(err, LOGIN_FAILED),
        }
    }

    #[instrument(skip(self))]
    pub async fn register(&mut self, email: &str, username: &str) {
        if self.reject_if_logged_in() {
            return;
        }
        if email.trim().is_empty() || username.trim().is_empty() {
            self.report(
                ClientError::Validation(EMAIL_AND_USERNAME_REQUIRED.to_string()),
                REGISTER_FAILED,
            );
            return;
        }
        self.state.error = None;

        let request = RegisterRequest {
            email: email.trim().to_string(),
            username: username.trim().to_string(),
        };
        match self.api.register(&request).await {
            Ok(user) => self.sign_in(user).await,
            Err(err) => self.report_auth_failure(err, REGISTER_FAILED),
        }
    }

    /// Local only; there is no server-side session to end. The state is reset
    /// even when the persisted user cannot be removed, and that failure is
    /// reported as the error.
    #[instrument(skip(self))]
    pub fn logout(&mut self) {
        let cleared = clear_user(&self.store);
        let user_id = self.state.user.as_ref().map(|u| u.id);
        self.state = AppState::default();
        match cleared {
            Ok(()) => info!(?user_id, "logged out"),
            Err(error) => {
                error!(?user_id, error = %error, "failed removing persisted user");
                self.state.error = Some(LOGOUT_FAILED.to_string());
            }
        }
    }

    pub fn edit_new_task(&mut self, form: NewTaskForm) {
        self.state.new_task = form;
    }

    /// Fills the new-task form and submits it.
    pub async fn add_task(&mut self, title: &str, description: &str, status: Option<TaskStatus>) {
        self.edit_new_task(NewTaskForm {
            title: title.to_string(),
            description: description.to_string(),
            status: status.unwrap_or_default(),
        });
        self.submit_new_task().await;
    }

    /// Submits the new-task form. The form is cleared only once the task has
    /// been created.
    #[instrument(skip(self))]
    pub async fn submit_new_task(&mut self) {
        let Some(user_id) = self.require_user() else {
            return;
        };
        let form = self.state.new_task.clone();
        if let Err(err) = validate_task_text(&form.title, &form.description) {
            self.report(err, ADD_FAILED);
            return;
        }
        self.state.error = None;

        let body = NewTask {
            title: form.title,
            description: form.description,
            status: form.status,
        };
        match self.api.create_task(user_id, &body).await {
            Ok(task) => {
                info!(user_id, task_id = task.id, "task created");
                self.fetch_tasks().await;
                self.state.new_task = NewTaskForm::default();
            }
            Err(err) => self.report(err, ADD_FAILED),
        }
    }

    #[instrument(skip(self))]
    pub async fn update_task_status(&mut self, task_id: i64, status: TaskStatus) {
        let Some(user_id) = self.require_user() else {
            return;
        };
        self.state.error = None;

        match self
            .api
            .update_task(user_id, task_id, &TaskUpdate::status(status))
            .await
        {
            Ok(_) => {
                info!(user_id, task_id, %status, "task status updated");
                self.fetch_tasks().await;
            }
            Err(err) => self.report(err, UPDATE_FAILED),
        }
    }

    #[instrument(skip(self))]
    pub async fn edit_task(&mut self, task_id: i64, title: &str, description: &str) {
        let Some(user_id) = self.require_user() else {
            return;
        };
        if let Err(err) = validate_task_text(title, description) {
            self.report(err, UPDATE_FAILED);
            return;
        }
        self.state.error = None;

        let update = TaskUpdate::text(title.to_string(), description.to_string());
        match self.api.update_task(user_id, task_id, &update).await {
            Ok(_) => {
                info!(user_id, task_id, "task edited");
                self.fetch_tasks().await;
            }
            Err(err) => self.report(err, UPDATE_FAILED),
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&mut self, task_id: i64) {
        let Some(user_id) = self.require_user() else {
            return;
        };
        self.state.error = None;

        match self.api.delete_task(user_id, task_id).await {
            Ok(()) => {
                info!(user_id, task_id, "task deleted");
                self.fetch_tasks().await;
            }
            Err(err) => self.report(err, DELETE_FAILED),
        }
    }

    /// Flips the checkbox of a displayed task. Ids that are not on screen are
    /// ignored and `false` is returned.
    pub fn toggle_selection(&mut self, task_id: i64) -> bool {
        if !self.state.tasks.iter().any(|task| task.id == task_id) {
            debug!(task_id, "ignoring selection of a task that is not displayed");
            return false;
        }
        if !self.state.selected.remove(&task_id) {
            self.state.selected.insert(task_id);
        }
        true
    }

    pub fn select_all(&mut self) {
        self.state.selected = self.state.tasks.iter().map(|task| task.id).collect();
    }

    pub fn clear_selection(&mut self) {
        self.state.selected.clear();
    }

    /// Stages the selected cancelled tasks and opens the confirmation dialog.
    /// Returns whether the dialog opened.
    #[instrument(skip(self))]
    pub fn request_bulk_delete(&mut self) -> bool {
        let staged: Vec<i64> = self
            .state
            .tasks
            .iter()
            .filter(|task| task.is_cancelled() && self.state.selected.contains(&task.id))
            .map(|task| task.id)
            .collect();

        if staged.is_empty() {
            warn!("bulk delete requested without any selected cancelled task");
            self.state.error = Some(NO_CANCELLED_SELECTED.to_string());
            return false;
        }

        debug!(selected = self.state.selected.len(), staged = ?staged, "staged tasks for deletion");
        self.state.error = None;
        self.state.pending_delete = staged;
        self.state.confirm_open = true;
        true
    }

    pub fn cancel_bulk_delete(&mut self) {
        self.state.pending_delete.clear();
        self.state.confirm_open = false;
    }

    /// Deletes the staged tasks one at a time, in staging order, then closes
    /// the dialog and refetches. Any failed delete yields one aggregate error.
    #[instrument(skip(self))]
    pub async fn confirm_bulk_delete(&mut self) -> Vec<DeleteOutcome> {
        if !self.state.confirm_open || self.state.pending_delete.is_empty() {
            debug!("no bulk delete awaiting confirmation");
            return Vec::new();
        }
        let Some(user_id) = self.require_user() else {
            self.cancel_bulk_delete();
            return Vec::new();
        };

        let staged = std::mem::take(&mut self.state.pending_delete);
        let mut outcomes = Vec::with_capacity(staged.len());
        for task_id in staged {
            let result = self.api.delete_task(user_id, task_id).await;
            if let Err(err) = &result {
                warn!(user_id, task_id, error = %err, "bulk delete of task failed");
            }
            outcomes.push(DeleteOutcome { task_id, result });
        }

        self.state.confirm_open = false;
        self.fetch_tasks().await;

        let failed = outcomes.iter().filter(|outcome| !outcome.is_ok()).count();
        info!(
            user_id,
            deleted = outcomes.len() - failed,
            failed,
            "bulk delete finished"
        );
        if failed > 0 {
            self.state.error = Some(BULK_DELETE_FAILED.to_string());
        }
        outcomes
    }

    /// Writes the displayed tasks to `tasks_<today>.csv` inside `dir`.
    pub fn export_to_csv(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        export::write_csv(dir, &self.state.tasks, Local::now().date_naive())
    }

    fn require_user(&mut self) -> Option<i64> {
        let user_id = self.state.user.as_ref().map(|user| user.id);
        if user_id.is_none() {
            debug!("action needs a logged-in user");
            self.state.error = Some(NOT_LOGGED_IN.to_string());
        }
        user_id
    }

    fn reject_if_logged_in(&mut self) -> bool {
        let Some(user) = self.state.user.as_ref() else {
            return false;
        };
        warn!(user_id = user.id, "sign-in attempted while already logged in");
        self.state.error = Some(ALREADY_LOGGED_IN.to_string());
        true
    }

    async fn sign_in(&mut self, user: User) {
        if let Err(error) = save_user(&self.store, &user) {
            error!(error = %error, "failed persisting user");
        }
        info!(user_id = user.id, username = %user.username, "signed in");

        self.state.tasks.clear();
        self.state.selected.clear();
        self.cancel_bulk_delete();
        self.state.user = Some(user);
        self.state.auth_view = AuthView::Login;
        self.fetch_tasks().await;
    }

    fn report_auth_failure(&mut self, err: ClientError, fallback: &str) {
        let shown = err.detail().unwrap_or(fallback).to_string();
        warn!(error = %err, shown = %shown, "authentication failed");
        self.state.error = Some(shown);
    }

    fn report(&mut self, err: ClientError, fallback: &str) {
        let shown = match &err {
            ClientError::Validation(message) => message.clone(),
            _ => fallback.to_string(),
        };
        warn!(error = %err, shown = %shown, "action failed");
        self.state.error = Some(shown);
    }

    fn retain_pending_delete(&mut self) {
        if self.state.pending_delete.is_empty() {
            return;
        }
        let tasks = &self.state.tasks;
        self.state
            .pending_delete
            .retain(|id| tasks.iter().any(|task| task.id == *id && task.is_cancelled()));
        if self.state.pending_delete.is_empty() {
            self.state.confirm_open = false;
        }
    }
}

fn validate_task_text(title: &str, description: &str) -> Result<(), ClientError> {
    if title.trim().is_empty() || description.trim().is_empty() {
        return Err(ClientError::Validation(TASK_TEXT_REQUIRED.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    use super::*;
    use crate::storage::{MemoryStore, USER_STORAGE_KEY};

    #[derive(Default)]
    struct Backend {
        tasks: Vec<Task>,
        next_id: i64,
        users: BTreeMap<String, User>,
        calls: Vec<String>,
        fail_list: bool,
        fail_create: bool,
        fail_delete: BTreeSet<i64>,
        login_detail: Option<String>,
        fail_register: bool,
    }

    #[derive(Default)]
    struct FakeApi {
        backend: Mutex<Backend>,
    }

    impl FakeApi {
        fn with_user(user: &User) -> Self {
            let api = FakeApi::default();
            {
                let mut backend = api.backend.lock();
                backend.next_id = 1;
                backend.users.insert(user.email.clone(), user.clone());
                backend.login_detail = Some("User not found with this email".to_string());
            }
            api
        }

        fn seed(&self, title: &str, status: TaskStatus) -> i64 {
            let mut backend = self.backend.lock();
            let id = backend.next_id;
            backend.next_id += 1;
            backend.tasks.push(Task {
                id,
                title: title.to_string(),
                description: Some(format!("about {title}")),
                status,
            });
            id
        }

        fn calls(&self) -> Vec<String> {
            self.backend.lock().calls.clone()
        }

        fn clear_calls(&self) {
            self.backend.lock().calls.clear();
        }

        fn server_tasks(&self) -> Vec<Task> {
            self.backend.lock().tasks.clone()
        }
    }

    fn rejected(status: u16, detail: Option<&str>) -> ClientError {
        ClientError::Http {
            status,
            detail: detail.map(str::to_string),
        }
    }

    #[async_trait]
    impl TaskApi for FakeApi {
        async fn list_tasks(&self, user_id: i64) -> Result<Vec<Task>, ClientError> {
            let mut backend = self.backend.lock();
            backend.calls.push(format!("list {user_id}"));
            if backend.fail_list {
                return Err(rejected(500, None));
            }
            Ok(backend.tasks.clone())
        }

        async fn create_task(&self, user_id: i64, task: &NewTask) -> Result<Task, ClientError> {
            let mut backend = self.backend.lock();
            backend.calls.push(format!("create {user_id}"));
            if backend.fail_create {
                return Err(rejected(400, Some("Title should not be empty")));
            }
            let created = Task {
                id: backend.next_id,
                title: task.title.clone(),
                description: Some(task.description.clone()),
                status: task.status,
            };
            backend.next_id += 1;
            backend.tasks.push(created.clone());
            Ok(created)
        }

        async fn update_task(
            &self,
            user_id: i64,
            task_id: i64,
            update: &TaskUpdate,
        ) -> Result<Task, ClientError> {
            let mut backend = self.backend.lock();
            backend.calls.push(format!("update {user_id} {task_id}"));
            let task = backend
                .tasks
                .iter_mut()
                .find(|task| task.id == task_id)
                .ok_or_else(|| rejected(404, Some("Task not found or unauthorized")))?;
            if let Some(status) = update.status {
                task.status = status;
            }
            if let Some(title) = &update.title {
                task.title = title.clone();
            }
            if let Some(description) = &update.description {
                task.description = Some(description.clone());
            }
            Ok(task.clone())
        }

        async fn delete_task(&self, user_id: i64, task_id: i64) -> Result<(), ClientError> {
            let mut backend = self.backend.lock();
            backend.calls.push(format!("delete {user_id} {task_id}"));
            if backend.fail_delete.contains(&task_id) {
                return Err(rejected(400, Some("Only cancelled tasks can be deleted")));
            }
            backend.tasks.retain(|task| task.id != task_id);
            Ok(())
        }

        async fn login(&self, request: &LoginRequest) -> Result<User, ClientError> {
            let mut backend = self.backend.lock();
            backend.calls.push(format!("login {}", request.email));
            backend
                .users
                .get(&request.email)
                .cloned()
                .ok_or_else(|| rejected(401, backend.login_detail.as_deref()))
        }

        async fn register(&self, request: &RegisterRequest) -> Result<User, ClientError> {
            let mut backend = self.backend.lock();
            backend.calls.push(format!("register {}", request.email));
            if backend.fail_register {
                return Err(rejected(503, None));
            }
            if backend.users.contains_key(&request.email) {
                return Err(rejected(400, Some("Email already registered")));
            }
            let user = User {
                id: 100 + backend.users.len() as i64,
                email: request.email.clone(),
                username: request.username.clone(),
            };
            backend.users.insert(user.email.clone(), user.clone());
            Ok(user)
        }
    }

    /// Store whose removals always fail.
    struct StuckStore(MemoryStore);

    impl KeyValueStore for StuckStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            anyhow::bail!("cannot remove {key}: read-only store")
        }
    }

    fn ada() -> User {
        User {
            id: 1,
            email: "ada@example.com".to_string(),
            username: "ada".to_string(),
        }
    }

    async fn logged_in_client() -> TaskListClient<FakeApi, MemoryStore> {
        let mut client = TaskListClient::new(FakeApi::with_user(&ada()), MemoryStore::new());
        client.login("ada@example.com").await;
        assert!(client.state().is_logged_in());
        client.api().clear_calls();
        client
    }

    #[tokio::test]
    async fn empty_title_or_description_never_reaches_the_server() {
        let mut client = logged_in_client().await;

        client.add_task("", "something", None).await;
        assert_eq!(client.state().error.as_deref(), Some(TASK_TEXT_REQUIRED));

        client.dismiss_error();
        client.add_task("title", "   ", None).await;
        assert_eq!(client.state().error.as_deref(), Some(TASK_TEXT_REQUIRED));
        assert_eq!(client.state().new_task.title, "title");

        assert!(client.api().calls().is_empty());
    }

    #[tokio::test]
    async fn mutations_leave_the_list_equal_to_the_server_list() {
        let mut client = logged_in_client().await;
        let keep = client.api().seed("keep", TaskStatus::Todo);
        let drop = client.api().seed("drop", TaskStatus::Cancelled);

        client.add_task("new", "fresh", Some(TaskStatus::InProgress)).await;
        assert_eq!(client.state().tasks, client.api().server_tasks());
        assert_eq!(client.state().new_task, NewTaskForm::default());

        client.update_task_status(keep, TaskStatus::Completed).await;
        assert_eq!(client.state().tasks, client.api().server_tasks());

        client.edit_task(keep, "kept", "edited").await;
        assert_eq!(client.state().tasks, client.api().server_tasks());

        client.delete_task(drop).await;
        assert_eq!(client.state().tasks, client.api().server_tasks());
        assert_eq!(client.state().tasks.len(), 2);
        assert_eq!(client.state().error, None);

        assert_eq!(
            client.api().calls(),
            vec![
                "create 1",
                "list 1",
                "update 1 1",
                "list 1",
                "update 1 1",
                "list 1",
                "delete 1 2",
                "list 1",
            ]
        );
    }

    #[tokio::test]
    async fn failed_create_keeps_the_form_and_shows_a_generic_error() {
        let mut client = logged_in_client().await;
        client.api().backend.lock().fail_create = true;

        client.add_task("title", "body", None).await;

        assert_eq!(client.state().error.as_deref(), Some(ADD_FAILED));
        assert_eq!(client.state().new_task.title, "title");
        assert_eq!(client.api().calls(), vec!["create 1"]);
    }

    #[tokio::test]
    async fn failed_fetch_clears_loading_and_keeps_the_old_list() {
        let mut client = logged_in_client().await;
        client.api().seed("a", TaskStatus::Todo);
        client.fetch_tasks().await;
        assert_eq!(client.state().tasks.len(), 1);

        client.api().backend.lock().fail_list = true;
        client.fetch_tasks().await;

        assert!(!client.state().loading);
        assert_eq!(client.state().error.as_deref(), Some(FETCH_FAILED));
        assert_eq!(client.state().tasks.len(), 1);
    }

    #[tokio::test]
    async fn selection_stays_within_displayed_tasks() {
        let mut client = logged_in_client().await;
        let a = client.api().seed("a", TaskStatus::Todo);
        let b = client.api().seed("b", TaskStatus::Cancelled);
        client.fetch_tasks().await;

        assert!(client.toggle_selection(a));
        assert!(!client.toggle_selection(999));
        assert_eq!(client.state().selected, BTreeSet::from([a]));

        client.select_all();
        assert_eq!(client.state().selected, BTreeSet::from([a, b]));

        client.api().backend.lock().tasks.retain(|task| task.id != a);
        client.fetch_tasks().await;
        let displayed: BTreeSet<i64> = client.state().tasks.iter().map(|t| t.id).collect();
        assert!(client.state().selected.is_subset(&displayed));
        assert!(client.state().selected.is_empty());
    }

    #[tokio::test]
    async fn bulk_delete_without_cancelled_tasks_only_shows_an_error() {
        let mut client = logged_in_client().await;
        let a = client.api().seed("a", TaskStatus::Todo);
        client.api().seed("b", TaskStatus::Cancelled);
        client.fetch_tasks().await;
        client.api().clear_calls();

        client.toggle_selection(a);
        assert!(!client.request_bulk_delete());
        assert_eq!(client.state().error.as_deref(), Some(NO_CANCELLED_SELECTED));
        assert!(!client.state().confirm_open);

        assert!(client.confirm_bulk_delete().await.is_empty());
        assert!(client.api().calls().is_empty());
        assert_eq!(client.state().tasks.len(), 2);
    }

    #[tokio::test]
    async fn bulk_delete_runs_sequentially_and_aggregates_failures() {
        let mut client = logged_in_client().await;
        let todo = client.api().seed("todo", TaskStatus::Todo);
        let c1 = client.api().seed("c1", TaskStatus::Cancelled);
        let c2 = client.api().seed("c2", TaskStatus::Cancelled);
        let c3 = client.api().seed("c3", TaskStatus::Cancelled);
        client.api().backend.lock().fail_delete.insert(c2);
        client.fetch_tasks().await;
        client.api().clear_calls();

        client.select_all();
        assert!(client.request_bulk_delete());
        assert_eq!(client.state().pending_delete, vec![c1, c2, c3]);
        assert!(client.state().confirm_open);

        let outcomes = client.confirm_bulk_delete().await;

        let summary: Vec<(i64, bool)> = outcomes.iter().map(|o| (o.task_id, o.is_ok())).collect();
        assert_eq!(summary, vec![(c1, true), (c2, false), (c3, true)]);
        assert_eq!(
            client.api().calls(),
            vec!["delete 1 2", "delete 1 3", "delete 1 4", "list 1"]
        );
        assert!(!client.state().confirm_open);
        assert!(client.state().pending_delete.is_empty());
        assert_eq!(client.state().error.as_deref(), Some(BULK_DELETE_FAILED));

        let remaining: Vec<i64> = client.state().tasks.iter().map(|t| t.id).collect();
        assert_eq!(remaining, vec![todo, c2]);
    }

    #[tokio::test]
    async fn cancelling_the_dialog_issues_nothing() {
        let mut client = logged_in_client().await;
        let c = client.api().seed("c", TaskStatus::Cancelled);
        client.fetch_tasks().await;
        client.api().clear_calls();

        client.toggle_selection(c);
        assert!(client.request_bulk_delete());
        client.cancel_bulk_delete();

        assert!(client.confirm_bulk_delete().await.is_empty());
        assert!(client.api().calls().is_empty());
    }

    #[tokio::test]
    async fn login_persists_the_user_and_loads_tasks() {
        let api = FakeApi::with_user(&ada());
        api.seed("mine", TaskStatus::Todo);
        let mut client = TaskListClient::new(api, MemoryStore::new());

        client.login("  ada@example.com ").await;

        assert_eq!(client.state().user, Some(ada()));
        assert_eq!(client.state().tasks.len(), 1);
        let stored = client.store().get(USER_STORAGE_KEY).unwrap().expect("persisted");
        assert_eq!(serde_json::from_str::<User>(&stored).unwrap(), ada());
        assert_eq!(client.api().calls(), vec!["login ada@example.com", "list 1"]);
    }

    #[tokio::test]
    async fn rejected_login_shows_server_detail_or_fallback() {
        let mut client = TaskListClient::new(FakeApi::with_user(&ada()), MemoryStore::new());

        client.login("nobody@example.com").await;
        assert_eq!(client.state().user, None);
        assert_eq!(
            client.state().error.as_deref(),
            Some("User not found with this email")
        );

        client.api().backend.lock().login_detail = None;
        client.login("nobody@example.com").await;
        assert_eq!(client.state().user, None);
        assert_eq!(client.state().error.as_deref(), Some(LOGIN_FAILED));
        assert_eq!(client.store().get(USER_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn blank_email_is_rejected_locally() {
        let mut client = TaskListClient::new(FakeApi::with_user(&ada()), MemoryStore::new());

        client.login(" ").await;
        client.register("someone@example.com", "").await;

        assert_eq!(
            client.state().error.as_deref(),
            Some(EMAIL_AND_USERNAME_REQUIRED)
        );
        assert!(client.api().calls().is_empty());
    }

    #[tokio::test]
    async fn register_signs_in_and_resets_the_auth_toggle() {
        let mut client = TaskListClient::new(FakeApi::with_user(&ada()), MemoryStore::new());
        client.toggle_auth_view();
        assert_eq!(client.state().auth_view, AuthView::Register);
        client.show_login();
        client.show_register();
        assert_eq!(client.state().auth_view, AuthView::Register);

        client.register("ada@example.com", "ada").await;
        assert_eq!(client.state().error.as_deref(), Some("Email already registered"));
        assert!(!client.state().is_logged_in());

        client.register("bob@example.com", "bob").await;
        assert_eq!(client.state().user.as_ref().map(|u| u.username.as_str()), Some("bob"));
        assert_eq!(client.state().auth_view, AuthView::Login);
    }

    #[tokio::test]
    async fn logout_clears_tasks_and_persisted_user() {
        let mut client = logged_in_client().await;
        let c = client.api().seed("c", TaskStatus::Cancelled);
        client.fetch_tasks().await;
        client.toggle_selection(c);
        client.request_bulk_delete();

        client.logout();

        assert_eq!(client.state().user, None);
        assert!(client.state().tasks.is_empty());
        assert!(client.state().selected.is_empty());
        assert!(!client.state().confirm_open);
        assert_eq!(client.store().get(USER_STORAGE_KEY).unwrap(), None);

        client.logout();
        assert!(client.state().tasks.is_empty());
    }

    #[tokio::test]
    async fn actions_without_a_user_issue_no_requests() {
        let mut client = TaskListClient::new(FakeApi::with_user(&ada()), MemoryStore::new());

        client.fetch_tasks().await;
        client.delete_task(1).await;
        client.update_task_status(1, TaskStatus::Completed).await;

        assert_eq!(client.state().error.as_deref(), Some(NOT_LOGGED_IN));
        assert!(client.api().calls().is_empty());
    }

    #[tokio::test]
    async fn start_restores_a_persisted_session() {
        let store = MemoryStore::new();
        save_user(&store, &ada()).expect("save user");
        let api = FakeApi::with_user(&ada());
        api.seed("from before", TaskStatus::OnHold);

        let mut client = TaskListClient::new(api, store);
        client.start().await.expect("start");

        assert_eq!(client.state().user, Some(ada()));
        assert_eq!(client.state().tasks.len(), 1);
        assert_eq!(client.api().calls(), vec!["list 1"]);
    }

    #[tokio::test]
    async fn export_writes_the_displayed_tasks() {
        let mut client = logged_in_client().await;
        client.api().seed("A", TaskStatus::Todo);
        client.fetch_tasks().await;
        let temp = tempdir().expect("tempdir");

        let path = client.export_to_csv(temp.path()).expect("export");

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("tasks_") && name.ends_with(".csv"));
        let written = std::fs::read_to_string(&path).expect("read export");
        assert!(written.contains(r#"1,"A","about A",todo"#));
    }

    #[tokio::test]
    async fn refetch_drops_staged_ids_that_are_no_longer_cancelled() {
        let mut client = logged_in_client().await;
        let c1 = client.api().seed("c1", TaskStatus::Cancelled);
        let c2 = client.api().seed("c2", TaskStatus::Cancelled);
        client.fetch_tasks().await;
        client.select_all();
        assert!(client.request_bulk_delete());
        assert_eq!(client.state().pending_delete, vec![c1, c2]);

        client.api().backend.lock().tasks[0].status = TaskStatus::Todo;
        client.fetch_tasks().await;
        assert_eq!(client.state().pending_delete, vec![c2]);
        assert!(client.state().confirm_open);

        client.api().backend.lock().tasks.retain(|task| task.id != c2);
        client.fetch_tasks().await;
        assert!(client.state().pending_delete.is_empty());
        assert!(!client.state().confirm_open);
        assert!(client.confirm_bulk_delete().await.is_empty());
    }

    #[tokio::test]
    async fn sign_in_while_logged_in_is_refused_locally() {
        let mut client = logged_in_client().await;

        client.login("nobody@example.com").await;
        assert_eq!(client.state().user, Some(ada()));
        assert_eq!(client.state().error.as_deref(), Some(ALREADY_LOGGED_IN));

        client.register("bob@example.com", "bob").await;
        assert_eq!(client.state().user, Some(ada()));
        assert_eq!(client.state().error.as_deref(), Some(ALREADY_LOGGED_IN));

        assert!(client.api().calls().is_empty());
        assert!(client.store().get(USER_STORAGE_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn rejected_register_without_detail_falls_back() {
        let mut client = TaskListClient::new(FakeApi::with_user(&ada()), MemoryStore::new());
        client.api().backend.lock().fail_register = true;

        client.register("bob@example.com", "bob").await;

        assert!(!client.state().is_logged_in());
        assert_eq!(client.state().error.as_deref(), Some(REGISTER_FAILED));
        assert_eq!(client.store().get(USER_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn logout_reports_a_user_entry_it_could_not_remove() {
        let store = StuckStore(MemoryStore::new());
        save_user(&store, &ada()).expect("save user");
        let mut client = TaskListClient::new(FakeApi::with_user(&ada()), store);
        assert!(client.restore_session().expect("restore"));

        client.logout();

        assert_eq!(client.state().user, None);
        assert!(client.state().tasks.is_empty());
        assert_eq!(client.state().error.as_deref(), Some(LOGOUT_FAILED));
    }
}
