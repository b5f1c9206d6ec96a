//! Onboarding a new API as a library.
//!
//! [`configure_api`] checks that the API asks for a library in the
//! repository's language, lets the container derive the new library's
//! state, and then runs the regular per-library pipeline so that the new
//! library lands in a single `feat: Configure new library <id>` commit.

use crate::batch::BatchResult;
use crate::config::Config;
use crate::container::{check_response, write_request, ConfigureRequest, ContainerDriver};
use crate::defaults::GENERATOR_INPUT_DIR;
use crate::error::{Error, Result};
use crate::git::Repository;
use crate::pipeline::{Outcome, Pipeline, Trigger};
use crate::pull_request::PullRequestContent;
use crate::service_config::find_service_config;
use crate::state::{Api, ApiStatus, LibrarianConfig, LibrarianState, LibraryState};
use crate::sync;
use log::{error, info, warn};

/// Library ID used for an API until the container decides otherwise:
/// `google/cloud/secretmanager/v1` becomes `google-cloud-secretmanager-v1`.
pub fn library_id_for_api(api_path: &str) -> String {
    api_path.trim_matches('/').replace('/', "-")
}

/// Onboards `api_path` and generates the new library.
///
/// Command-level problems (API already configured, no language, the API
/// not requesting a library) are errors. A failing container step is
/// reported in the returned result, like a batch of one.
pub fn configure_api(
    config: &Config,
    librarian_config: &LibrarianConfig,
    repo: &dyn Repository,
    api_repo: &dyn Repository,
    container: &dyn ContainerDriver,
    state: &mut LibrarianState,
    api_path: &str,
) -> Result<BatchResult> {
    if let Some(existing) = state.find_library_by_api_path(api_path) {
        return Err(Error::Config {
            message: format!(
                "API {} is already configured in library {}",
                api_path, existing.id
            ),
        });
    }
    let language = config
        .language
        .as_deref()
        .or(librarian_config.language.as_deref())
        .ok_or_else(|| Error::Config {
            message: "--language is required when the repository does not declare one"
                .to_string(),
        })?;

    let api_dir = api_repo.dir().join(api_path);
    let Some((service_config, document)) = find_service_config(&api_dir)? else {
        return Err(Error::Config {
            message: format!("no service config found in {}", api_dir.display()),
        });
    };
    if !document.requests_library(language) {
        return Err(Error::Config {
            message: format!(
                "API {} does not request a {} library in {}",
                api_path, language, service_config
            ),
        });
    }

    let draft = LibraryState {
        id: library_id_for_api(api_path),
        apis: vec![Api {
            path: api_path.to_string(),
            service_config: service_config.clone(),
            status: ApiStatus::New,
        }],
        ..LibraryState::default()
    };

    let mut content = PullRequestContent::new();
    let library = match run_configure(config, repo, api_repo, container, &draft) {
        Ok(library) => library,
        Err(e) if !e.is_batch_fatal() => {
            error!("Error while configuring {}: {}", draft.id, e);
            repo.clean_working_tree()?;
            content.add_error(format!("Error while configuring {}", draft.id));
            return Ok(BatchResult {
                content,
                excess: Vec::new(),
            });
        }
        Err(e) => return Err(e),
    };

    if state.find_library(&library.id).is_some() {
        repo.clean_working_tree()?;
        return Err(Error::Config {
            message: format!("library {} already exists", library.id),
        });
    }
    let id = library.id.clone();
    state.libraries.push(library);
    if let Err(e) = state.validate() {
        state.libraries.retain(|l| l.id != id);
        repo.clean_working_tree()?;
        return Err(e);
    }

    let pipeline = Pipeline::new(config, librarian_config, repo, api_repo, container);
    match pipeline.run(state, &id, Trigger::Configure) {
        Ok(Outcome::Committed { summary, .. }) => content.add_success(summary),
        Ok(Outcome::Reverted { summary, .. }) => {
            state.libraries.retain(|l| l.id != id);
            repo.clean_working_tree()?;
            content.add_error(summary);
        }
        Ok(Outcome::Skipped(reason)) => {
            warn!("Configured library {} was skipped: {:?}", id, reason);
        }
        Err(e) => {
            state.libraries.retain(|l| l.id != id);
            return Err(e);
        }
    }
    Ok(BatchResult {
        content,
        excess: Vec::new(),
    })
}

/// Runs the container's configure step and returns the library it
/// describes. Generator input changes are copied into the repository.
fn run_configure(
    config: &Config,
    repo: &dyn Repository,
    api_repo: &dyn Repository,
    container: &dyn ContainerDriver,
    draft: &LibraryState,
) -> Result<LibraryState> {
    let generator_input = config.work_root.join("configure-input").join(&draft.id);
    let repo_input = repo.dir().join(GENERATOR_INPUT_DIR);
    sync::copy_fresh(&repo_input, &generator_input)?;

    let state_dir = config
        .work_root
        .join("librarian")
        .join(&draft.id)
        .join("configure");
    write_request(&state_dir, "configure", draft)?;
    container.configure(&ConfigureRequest {
        library_id: draft.id.clone(),
        api_root: api_repo.dir().to_path_buf(),
        generator_input: generator_input.clone(),
        state_dir: state_dir.clone(),
    })?;

    let mut library = match check_response(&state_dir, "configure", &draft.id)? {
        Some(library) => library,
        None => {
            warn!("Container returned no library for {}; using defaults", draft.id);
            draft.clone()
        }
    };
    if library.id.is_empty() {
        library.id = draft.id.clone();
    }
    for api in &draft.apis {
        if !library.apis.iter().any(|a| a.path == api.path) {
            library.apis.push(api.clone());
        }
    }

    sync::copy_tree(&generator_input, &repo_input)?;
    info!("Configured library {}", library.id);
    Ok(library)
}
