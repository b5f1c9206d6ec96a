//! # Container Steps
//!
//! Language-specific work (generating, cleaning, building, releasing,
//! packaging and publishing a library) is delegated to a container image
//! that understands the language. The orchestrator only knows the
//! [`ContainerDriver`] contract: each operation receives explicit host paths
//! and either succeeds or fails.
//!
//! ## Request and response artifacts
//!
//! Steps that need to know about a library get a *state directory* mounted
//! at `/librarian`. Before the step runs, the orchestrator writes the
//! library's current state there as `<command>-request.json`; the container
//! may answer with `<command>-response.json`. A response whose `error` field
//! is non-empty turns an otherwise successful run into a failure, and a
//! response carrying a `library` tells the orchestrator what the container
//! believes the library's state now is.
//!
//! The generate response's library is applied with [`apply_response`]
//! before the library is cleaned and committed. The clean and build
//! responses are only checked for an error: a build must leave the tree
//! and therefore the state document unchanged.
//!
//! [`DockerDriver`] implements the contract with `docker run`.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::LibraryState;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const MOUNT_APIS: &str = "/apis";
const MOUNT_OUTPUT: &str = "/output";
const MOUNT_REPO: &str = "/repo";
const MOUNT_STATE: &str = "/librarian";
const MOUNT_GENERATOR_INPUT: &str = "/.librarian/generator-input";

/// Onboards a new API as a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureRequest {
    pub library_id: String,
    pub api_root: PathBuf,
    pub generator_input: PathBuf,
    pub state_dir: PathBuf,
}

/// Generates a configured library into `output_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub library_id: String,
    pub api_root: PathBuf,
    pub output_dir: PathBuf,
    pub generator_input: PathBuf,
    pub state_dir: PathBuf,
}

/// Generates an API with no library context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRawRequest {
    pub api_path: String,
    pub api_root: PathBuf,
    pub output_dir: PathBuf,
}

/// Language-specific cleanup of a library in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanRequest {
    pub library_id: String,
    pub repo_dir: PathBuf,
    pub state_dir: PathBuf,
}

/// Builds and unit-tests a library in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub library_id: String,
    pub repo_dir: PathBuf,
    pub state_dir: PathBuf,
}

/// Builds raw generator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRawRequest {
    pub api_path: String,
    pub output_dir: PathBuf,
}

/// Prepares a library for release in an isolated copy of its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInitRequest {
    pub library_id: String,
    /// Mounted read-only.
    pub repo_dir: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
}

/// Runs a library's integration tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationTestRequest {
    pub library_id: String,
    pub repo_dir: PathBuf,
    pub state_dir: PathBuf,
}

/// Packages a library into `output_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub library_id: String,
    pub repo_dir: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
}

/// Publishes packaged artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub library_id: String,
    pub version: String,
    pub package_dir: PathBuf,
}

/// The container contract.
pub trait ContainerDriver {
    fn configure(&self, request: &ConfigureRequest) -> Result<()>;
    fn generate_library(&self, request: &GenerateRequest) -> Result<()>;
    fn generate_raw(&self, request: &GenerateRawRequest) -> Result<()>;
    fn clean(&self, request: &CleanRequest) -> Result<()>;
    fn build_library(&self, request: &BuildRequest) -> Result<()>;
    fn build_raw(&self, request: &BuildRawRequest) -> Result<()>;
    fn release_init(&self, request: &ReleaseInitRequest) -> Result<()>;
    fn integration_test_library(&self, request: &IntegrationTestRequest) -> Result<()>;
    fn package_library(&self, request: &PackageRequest) -> Result<()>;
    fn publish_library(&self, request: &PublishRequest) -> Result<()>;
}

/// The contents of a `<command>-response.json` artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn request_file(state_dir: &Path, command: &str) -> PathBuf {
    state_dir.join(format!("{}-request.json", command))
}

fn response_file(state_dir: &Path, command: &str) -> PathBuf {
    state_dir.join(format!("{}-response.json", command))
}

/// Creates a fresh state directory and writes the request artifact into it.
pub fn write_request(state_dir: &Path, command: &str, library: &LibraryState) -> Result<()> {
    if state_dir.exists() {
        fs::remove_dir_all(state_dir)?;
    }
    fs::create_dir_all(state_dir)?;
    let content = serde_json::to_string_pretty(library)?;
    fs::write(request_file(state_dir, command), content)?;
    Ok(())
}

/// Reads the response artifact, if the container wrote one.
pub fn read_response(state_dir: &Path, command: &str) -> Result<Option<ContainerResponse>> {
    let path = response_file(state_dir, command);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let response: ContainerResponse = serde_json::from_str(&content)?;
    Ok(Some(response))
}

/// Reads the response artifact and turns a reported error into a step failure.
pub fn check_response(
    state_dir: &Path,
    command: &str,
    target: &str,
) -> Result<Option<LibraryState>> {
    match read_response(state_dir, command)? {
        Some(ContainerResponse {
            error: Some(message),
            ..
        }) if !message.trim().is_empty() => Err(Error::Container {
            command: command.to_string(),
            target: target.to_string(),
            message,
        }),
        Some(response) => Ok(response.library),
        None => Ok(None),
    }
}

/// Takes the layout a container reported for `library`: source roots and
/// remove and preserve patterns, where the response lists any. Identity,
/// version and generation bookkeeping stay as recorded.
pub fn apply_response(library: &mut LibraryState, response: LibraryState) {
    if !response.id.is_empty() && response.id != library.id {
        warn!(
            "Ignoring container response for {} while processing {}",
            response.id, library.id
        );
        return;
    }
    if !response.source_roots.is_empty() {
        library.source_roots = response.source_roots;
    }
    if !response.remove_regex.is_empty() {
        library.remove_regex = response.remove_regex;
    }
    if !response.preserve_regex.is_empty() {
        library.preserve_regex = response.preserve_regex;
    }
}

/// A bind mount for `docker run`.
struct Mount<'a> {
    host: &'a Path,
    container: &'a str,
    read_only: bool,
}

impl<'a> Mount<'a> {
    fn rw(host: &'a Path, container: &'a str) -> Self {
        Self {
            host,
            container,
            read_only: false,
        }
    }

    fn ro(host: &'a Path, container: &'a str) -> Self {
        Self {
            host,
            container,
            read_only: true,
        }
    }
}

/// [`ContainerDriver`] that runs each step with `docker run`.
#[derive(Debug, Clone)]
pub struct DockerDriver {
    image: String,
    config: Config,
}

impl DockerDriver {
    pub fn new(image: String, config: &Config) -> Self {
        Self {
            image,
            config: config.clone(),
        }
    }

    /// Builds the `docker` argument list for one step.
    fn docker_args(&self, command: &str, mounts: &[Mount<'_>], args: &[String]) -> Vec<String> {
        let mut docker = vec!["run".to_string(), "--rm".to_string()];
        if let Some(user) = &self.config.container_user {
            docker.push("--user".to_string());
            docker.push(user.clone());
        }
        for mount in mounts {
            docker.push("-v".to_string());
            let host = self.config.host_path(mount.host);
            let mut spec = format!("{}:{}", host.display(), mount.container);
            if mount.read_only {
                spec.push_str(":ro");
            }
            docker.push(spec);
        }
        docker.push(self.image.clone());
        docker.push(command.to_string());
        docker.extend(args.iter().cloned());
        docker
    }

    fn run(&self, command: &str, target: &str, mounts: &[Mount<'_>], args: &[String]) -> Result<()> {
        let docker = self.docker_args(command, mounts, args);
        info!("Running container step '{}' for {}", command, target);
        debug!("docker {}", docker.join(" "));

        let status = Command::new("docker")
            .args(&docker)
            .status()
            .map_err(|e| Error::Container {
                command: command.to_string(),
                target: target.to_string(),
                message: format!("failed to start docker: {}", e),
            })?;
        if !status.success() {
            return Err(Error::Container {
                command: command.to_string(),
                target: target.to_string(),
                message: format!("container exited with {}", status),
            });
        }
        Ok(())
    }
}

fn flag(name: &str, value: &str) -> String {
    format!("--{}={}", name, value)
}

impl ContainerDriver for DockerDriver {
    fn configure(&self, request: &ConfigureRequest) -> Result<()> {
        self.run(
            "configure",
            &request.library_id,
            &[
                Mount::ro(&request.api_root, MOUNT_APIS),
                Mount::rw(&request.generator_input, MOUNT_GENERATOR_INPUT),
                Mount::rw(&request.state_dir, MOUNT_STATE),
            ],
            &[
                flag("source", MOUNT_APIS),
                flag("librarian", MOUNT_STATE),
                flag("input", MOUNT_GENERATOR_INPUT),
            ],
        )?;
        check_response(&request.state_dir, "configure", &request.library_id)?;
        Ok(())
    }

    fn generate_library(&self, request: &GenerateRequest) -> Result<()> {
        self.run(
            "generate",
            &request.library_id,
            &[
                Mount::ro(&request.api_root, MOUNT_APIS),
                Mount::rw(&request.output_dir, MOUNT_OUTPUT),
                Mount::rw(&request.generator_input, MOUNT_GENERATOR_INPUT),
                Mount::rw(&request.state_dir, MOUNT_STATE),
            ],
            &[
                flag("source", MOUNT_APIS),
                flag("output", MOUNT_OUTPUT),
                flag("librarian", MOUNT_STATE),
                flag("input", MOUNT_GENERATOR_INPUT),
                flag("library-id", &request.library_id),
            ],
        )?;
        check_response(&request.state_dir, "generate", &request.library_id)?;
        Ok(())
    }

    fn generate_raw(&self, request: &GenerateRawRequest) -> Result<()> {
        self.run(
            "generate-raw",
            &request.api_path,
            &[
                Mount::ro(&request.api_root, MOUNT_APIS),
                Mount::rw(&request.output_dir, MOUNT_OUTPUT),
            ],
            &[
                flag("source", MOUNT_APIS),
                flag("output", MOUNT_OUTPUT),
                flag("api", &request.api_path),
            ],
        )
    }

    fn clean(&self, request: &CleanRequest) -> Result<()> {
        self.run(
            "clean",
            &request.library_id,
            &[
                Mount::rw(&request.repo_dir, MOUNT_REPO),
                Mount::rw(&request.state_dir, MOUNT_STATE),
            ],
            &[
                flag("repo", MOUNT_REPO),
                flag("librarian", MOUNT_STATE),
                flag("library-id", &request.library_id),
            ],
        )?;
        check_response(&request.state_dir, "clean", &request.library_id)?;
        Ok(())
    }

    fn build_library(&self, request: &BuildRequest) -> Result<()> {
        self.run(
            "build",
            &request.library_id,
            &[
                Mount::rw(&request.repo_dir, MOUNT_REPO),
                Mount::rw(&request.state_dir, MOUNT_STATE),
            ],
            &[
                flag("repo", MOUNT_REPO),
                flag("librarian", MOUNT_STATE),
                flag("library-id", &request.library_id),
            ],
        )?;
        check_response(&request.state_dir, "build", &request.library_id)?;
        Ok(())
    }

    fn build_raw(&self, request: &BuildRawRequest) -> Result<()> {
        self.run(
            "build-raw",
            &request.api_path,
            &[Mount::rw(&request.output_dir, MOUNT_OUTPUT)],
            &[flag("output", MOUNT_OUTPUT), flag("api", &request.api_path)],
        )
    }

    fn release_init(&self, request: &ReleaseInitRequest) -> Result<()> {
        self.run(
            "release-init",
            &request.library_id,
            &[
                Mount::ro(&request.repo_dir, MOUNT_REPO),
                Mount::rw(&request.output_dir, MOUNT_OUTPUT),
                Mount::rw(&request.state_dir, MOUNT_STATE),
            ],
            &[
                flag("repo", MOUNT_REPO),
                flag("output", MOUNT_OUTPUT),
                flag("librarian", MOUNT_STATE),
                flag("library-id", &request.library_id),
            ],
        )?;
        check_response(&request.state_dir, "release-init", &request.library_id)?;
        Ok(())
    }

    fn integration_test_library(&self, request: &IntegrationTestRequest) -> Result<()> {
        self.run(
            "integration-test",
            &request.library_id,
            &[
                Mount::rw(&request.repo_dir, MOUNT_REPO),
                Mount::rw(&request.state_dir, MOUNT_STATE),
            ],
            &[
                flag("repo", MOUNT_REPO),
                flag("librarian", MOUNT_STATE),
                flag("library-id", &request.library_id),
            ],
        )
    }

    fn package_library(&self, request: &PackageRequest) -> Result<()> {
        self.run(
            "package",
            &request.library_id,
            &[
                Mount::rw(&request.repo_dir, MOUNT_REPO),
                Mount::rw(&request.output_dir, MOUNT_OUTPUT),
                Mount::rw(&request.state_dir, MOUNT_STATE),
            ],
            &[
                flag("repo", MOUNT_REPO),
                flag("output", MOUNT_OUTPUT),
                flag("librarian", MOUNT_STATE),
                flag("library-id", &request.library_id),
            ],
        )
    }

    fn publish_library(&self, request: &PublishRequest) -> Result<()> {
        self.run(
            "publish",
            &request.library_id,
            &[Mount::ro(&request.package_dir, MOUNT_OUTPUT)],
            &[
                flag("package-dir", MOUNT_OUTPUT),
                flag("library-id", &request.library_id),
                flag("version", &request.version),
            ],
        )
    }
}

/// Scriptable [`ContainerDriver`] used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    type Hook = Box<dyn Fn(&str, &str) + Send + Sync>;

    /// Records every call as `"<command> <target>"` and fails the
    /// `(command, target)` pairs listed in `failures`.
    #[derive(Default)]
    pub struct FakeContainer {
        pub calls: Mutex<Vec<String>>,
        pub failures: Vec<(String, String)>,
        /// Files written into the generate output dir: `(relative path, content)`.
        pub generated_files: Vec<(String, String)>,
        /// Response written by `configure`.
        pub configure_response: Option<LibraryState>,
        /// Response written by `generate`.
        pub generate_response: Option<LibraryState>,
        /// Invoked after each call with `(command, target)`.
        pub hook: Option<Hook>,
    }

    impl FakeContainer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(mut self, command: &str, target: &str) -> Self {
            self.failures.push((command.to_string(), target.to_string()));
            self
        }

        pub fn generating(mut self, path: &str, content: &str) -> Self {
            self.generated_files
                .push((path.to_string(), content.to_string()));
            self
        }

        pub fn responding_to_generate(mut self, library: LibraryState) -> Self {
            self.generate_response = Some(library);
            self
        }

        pub fn with_hook(mut self, hook: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
            self.hook = Some(Box::new(hook));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn step(&self, command: &str, target: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", command, target));
            if let Some(hook) = &self.hook {
                hook(command, target);
            }
            if self
                .failures
                .iter()
                .any(|(c, t)| c == command && t == target)
            {
                return Err(Error::Container {
                    command: command.to_string(),
                    target: target.to_string(),
                    message: "internal detail: exit status 1".to_string(),
                });
            }
            Ok(())
        }

        fn write_outputs(&self, output_dir: &Path) {
            for (path, content) in &self.generated_files {
                let full = output_dir.join(path);
                fs::create_dir_all(full.parent().unwrap()).unwrap();
                fs::write(full, content).unwrap();
            }
        }
    }

    fn write_response(state_dir: &Path, command: &str, library: &LibraryState) {
        let response = ContainerResponse {
            library: Some(library.clone()),
            error: None,
        };
        fs::write(
            response_file(state_dir, command),
            serde_json::to_string(&response).unwrap(),
        )
        .unwrap();
    }

    impl ContainerDriver for FakeContainer {
        fn configure(&self, request: &ConfigureRequest) -> Result<()> {
            self.step("configure", &request.library_id)?;
            if let Some(library) = &self.configure_response {
                write_response(&request.state_dir, "configure", library);
            }
            Ok(())
        }

        fn generate_library(&self, request: &GenerateRequest) -> Result<()> {
            self.step("generate", &request.library_id)?;
            self.write_outputs(&request.output_dir);
            if let Some(library) = &self.generate_response {
                write_response(&request.state_dir, "generate", library);
            }
            Ok(())
        }

        fn generate_raw(&self, request: &GenerateRawRequest) -> Result<()> {
            self.step("generate-raw", &request.api_path)?;
            self.write_outputs(&request.output_dir);
            Ok(())
        }

        fn clean(&self, request: &CleanRequest) -> Result<()> {
            self.step("clean", &request.library_id)
        }

        fn build_library(&self, request: &BuildRequest) -> Result<()> {
            self.step("build", &request.library_id)
        }

        fn build_raw(&self, request: &BuildRawRequest) -> Result<()> {
            self.step("build-raw", &request.api_path)
        }

        fn release_init(&self, request: &ReleaseInitRequest) -> Result<()> {
            self.step("release-init", &request.library_id)
        }

        fn integration_test_library(&self, request: &IntegrationTestRequest) -> Result<()> {
            self.step("integration-test", &request.library_id)
        }

        fn package_library(&self, request: &PackageRequest) -> Result<()> {
            self.step("package", &request.library_id)
        }

        fn publish_library(&self, request: &PublishRequest) -> Result<()> {
            self.step("publish", &request.library_id)
        }
    }
}
