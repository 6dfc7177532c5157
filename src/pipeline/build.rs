//! Build stage - produces a driver image with an in-cluster image builder

use crate::cluster::{
    Build, BuildArg, Container, DownwardApiFile, Job, KernelMapping, KeyToPath, PodSpec,
    PodTemplate, PodTemplateMeta, PullOptions, PushOptions, RestartPolicy, SecretRef, Target,
    Volume, VolumeMount, VolumeSource, DOCKER_CONFIG_JSON_KEY,
};

use super::sign::effective_sign;
use super::{job_metadata, with_default_secret, StageError, StageName};

/// Build argument always set to the target kernel
pub const KERNEL_VERSION_ARG: &str = "KERNEL_VERSION";

const BUILDER_CONTAINER_NAME: &str = "kaniko";
const DOCKERFILE_ANNOTATION: &str = "Dockerfile";
const DOCKERFILE_VOLUME: &str = "dockerfile";
const WORKSPACE_PATH: &str = "/workspace";
const PULL_SECRET_VOLUME: &str = "pull-secret";
const DOCKER_CONFIG_PATH: &str = "/kaniko/.docker";
const BUILD_SECRETS_PATH: &str = "/run/secrets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStage {
    builder_image: String,
}

impl BuildStage {
    pub fn new(builder_image: impl Into<String>) -> Self {
        Self {
            builder_image: builder_image.into(),
        }
    }

    pub fn should_run(&self, target: &Target, mapping: &KernelMapping) -> bool {
        target.spec.build.is_some() || mapping.build.is_some()
    }

    pub fn pull_options(&self, target: &Target, mapping: &KernelMapping) -> PullOptions {
        let pull = effective_build(target, mapping)
            .map(|b| b.pull)
            .unwrap_or_default();
        with_default_secret(pull, target)
    }

    /// The sign stage's unsigned image when signing is configured, else the
    /// mapping's container image
    pub fn output_image(
        &self,
        target: &Target,
        mapping: &KernelMapping,
    ) -> Result<String, StageError> {
        effective_sign(target, mapping)
            .and_then(|sign| sign.unsigned().map(str::to_string))
            .or_else(|| mapping.image().map(str::to_string))
            .ok_or(StageError::NoOutputImage {
                stage: StageName::Build,
            })
    }

    pub fn build_job(
        &self,
        target: &Target,
        mapping: &KernelMapping,
        kernel: &str,
    ) -> Result<Job, StageError> {
        let build = effective_build(target, mapping).ok_or_else(|| {
            StageError::invalid(StageName::Build, "no build configuration for mapping")
        })?;
        if build.dockerfile.is_empty() {
            return Err(StageError::invalid(StageName::Build, "dockerfile is empty"));
        }

        let destination = self.output_image(target, mapping)?;
        let metadata = job_metadata(target, kernel, StageName::Build)?;

        let mut container = Container::new(BUILDER_CONTAINER_NAME, &self.builder_image);
        container.args = builder_args(&destination, &build, kernel);
        container.security_context = target.spec.driver_container.security_context.clone();
        container
            .volume_mounts
            .push(VolumeMount::read_only(DOCKERFILE_VOLUME, WORKSPACE_PATH));

        let mut volumes = vec![Volume {
            name: DOCKERFILE_VOLUME.to_string(),
            source: VolumeSource::DownwardApi {
                items: vec![DownwardApiFile {
                    path: DOCKERFILE_ANNOTATION.to_string(),
                    field_path: format!("metadata.annotations['{}']", DOCKERFILE_ANNOTATION),
                }],
            },
        }];

        if let Some(pull_secret) = &target.spec.image_repo_secret {
            volumes.push(Volume {
                name: PULL_SECRET_VOLUME.to_string(),
                source: VolumeSource::Secret {
                    secret_name: pull_secret.name.clone(),
                    items: vec![KeyToPath::new(DOCKER_CONFIG_JSON_KEY, "config.json")],
                },
            });
            container
                .volume_mounts
                .push(VolumeMount::read_only(PULL_SECRET_VOLUME, DOCKER_CONFIG_PATH));
        }

        for secret in &build.secrets {
            let name = secret_volume_name(secret);
            volumes.push(Volume {
                name: name.clone(),
                source: VolumeSource::Secret {
                    secret_name: secret.name.clone(),
                    items: Vec::new(),
                },
            });
            container.volume_mounts.push(VolumeMount::read_only(
                name,
                format!("{}/{}", BUILD_SECRETS_PATH, secret.name),
            ));
        }

        let mut annotations = crate::cluster::Labels::new();
        annotations.insert(DOCKERFILE_ANNOTATION.to_string(), build.dockerfile.clone());

        let template = PodTemplate {
            metadata: PodTemplateMeta {
                labels: Default::default(),
                annotations,
            },
            spec: PodSpec {
                containers: vec![container],
                volumes,
                restart_policy: Some(RestartPolicy::OnFailure),
                ..Default::default()
            },
        };

        Ok(Job::new(metadata, template))
    }
}

fn secret_volume_name(secret: &SecretRef) -> String {
    format!("secret-{}", secret.name)
}

fn builder_args(destination: &str, build: &Build, kernel: &str) -> Vec<String> {
    let mut args = vec!["--destination".to_string(), destination.to_string()];

    let build_args = apply_build_arg_overrides(
        &build.build_args,
        &[BuildArg::new(KERNEL_VERSION_ARG, kernel)],
    );
    for arg in build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", arg.name, arg.value));
    }

    if build.pull.insecure {
        args.push("--insecure-pull".to_string());
    }
    if build.pull.insecure_skip_tls_verify {
        args.push("--skip-tls-verify-pull".to_string());
    }
    if build.push.insecure {
        args.push("--insecure".to_string());
    }
    if build.push.insecure_skip_tls_verify {
        args.push("--skip-tls-verify".to_string());
    }

    args
}

/// Drop every argument that has an override, then append the overrides in
/// their declared order
pub fn apply_build_arg_overrides(args: &[BuildArg], overrides: &[BuildArg]) -> Vec<BuildArg> {
    let mut merged: Vec<BuildArg> = args
        .iter()
        .filter(|arg| !overrides.iter().any(|o| o.name == arg.name))
        .cloned()
        .collect();
    merged.extend(overrides.iter().cloned());
    merged
}

/// Module-level build defaults overlaid with the mapping's build settings
pub fn effective_build(target: &Target, mapping: &KernelMapping) -> Option<Build> {
    match (&target.spec.build, &mapping.build) {
        (None, None) => None,
        (Some(module), None) => Some(module.clone()),
        (None, Some(own)) => Some(own.clone()),
        (Some(module), Some(own)) => Some(Build {
            dockerfile: if own.dockerfile.is_empty() {
                module.dockerfile.clone()
            } else {
                own.dockerfile.clone()
            },
            build_args: apply_build_arg_overrides(&module.build_args, &own.build_args),
            pull: if own.pull == PullOptions::default() {
                module.pull.clone()
            } else {
                own.pull.clone()
            },
            push: if own.push == PushOptions::default() {
                module.push.clone()
            } else {
                own.push.clone()
            },
            secrets: if own.secrets.is_empty() {
                module.secrets.clone()
            } else {
                own.secrets.clone()
            },
        }),
    }
}
