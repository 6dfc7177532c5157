//! Sign stage - signs module files inside an image and pushes the result

use crate::cluster::{
    Container, Job, KernelMapping, KeyToPath, PodSpec, PodTemplate, PullOptions, RestartPolicy,
    SecretRef, Sign, Target, Volume, VolumeMount, VolumeSource, DOCKER_CONFIG_JSON_KEY,
};

use super::{job_metadata, with_default_secret, StageError, StageName};

const SIGNER_CONTAINER_NAME: &str = "signimage";
const KEY_MOUNT_PATH: &str = "/signingkey";
const KEY_FILE: &str = "key.priv";
const CERT_MOUNT_PATH: &str = "/signingcert";
const CERT_FILE: &str = "public.der";
const PULL_SECRET_MOUNT_PATH: &str = "/docker_config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignStage {
    signer_image: String,
}

impl SignStage {
    pub fn new(signer_image: impl Into<String>) -> Self {
        Self {
            signer_image: signer_image.into(),
        }
    }

    /// Signing only runs when the mapping itself asks for it
    pub fn should_run(&self, _target: &Target, mapping: &KernelMapping) -> bool {
        mapping.sign.is_some()
    }

    pub fn pull_options(&self, target: &Target, mapping: &KernelMapping) -> PullOptions {
        let pull = effective_sign(target, mapping)
            .map(|s| s.pull)
            .unwrap_or_default();
        with_default_secret(pull, target)
    }

    /// The signed image, else the mapping's container image
    pub fn output_image(
        &self,
        target: &Target,
        mapping: &KernelMapping,
    ) -> Result<String, StageError> {
        effective_sign(target, mapping)
            .and_then(|sign| sign.signed().map(str::to_string))
            .or_else(|| mapping.image().map(str::to_string))
            .ok_or(StageError::NoOutputImage {
                stage: StageName::Sign,
            })
    }

    /// Image whose files get signed: the unsigned image, else the mapping's
    /// container image
    fn input_image(&self, sign: &Sign, mapping: &KernelMapping) -> Result<String, StageError> {
        sign.unsigned()
            .or_else(|| mapping.image())
            .map(str::to_string)
            .ok_or_else(|| StageError::invalid(StageName::Sign, "no unsigned image to sign"))
    }

    pub fn build_job(
        &self,
        target: &Target,
        mapping: &KernelMapping,
        kernel: &str,
    ) -> Result<Job, StageError> {
        let sign = effective_sign(target, mapping).ok_or_else(|| {
            StageError::invalid(StageName::Sign, "no sign configuration for mapping")
        })?;
        let key_secret = sign
            .key_secret
            .as_ref()
            .ok_or_else(|| StageError::invalid(StageName::Sign, "keySecret is required"))?;
        let cert_secret = sign
            .cert_secret
            .as_ref()
            .ok_or_else(|| StageError::invalid(StageName::Sign, "certSecret is required"))?;
        if sign.files_to_sign.is_empty() {
            return Err(StageError::invalid(StageName::Sign, "filesToSign is empty"));
        }

        let signed = self.output_image(target, mapping)?;
        let unsigned = self.input_image(&sign, mapping)?;
        let metadata = job_metadata(target, kernel, StageName::Sign)?;

        let mut args = vec![
            "-signedimage".to_string(),
            signed,
            "-unsignedimage".to_string(),
            unsigned,
        ];
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();

        if let Some(pull_secret) = &sign.image_pull_secret {
            args.push("-pullsecret".to_string());
            args.push(format!("{}/config.json", PULL_SECRET_MOUNT_PATH));
            volumes.push(secret_volume(pull_secret, DOCKER_CONFIG_JSON_KEY, "config.json"));
            mounts.push(VolumeMount::read_only(
                secret_volume_name(pull_secret),
                PULL_SECRET_MOUNT_PATH,
            ));
        }

        args.extend([
            "-key".to_string(),
            format!("{}/{}", KEY_MOUNT_PATH, KEY_FILE),
            "-cert".to_string(),
            format!("{}/{}", CERT_MOUNT_PATH, CERT_FILE),
            "-filestosign".to_string(),
            sign.files_to_sign.join(":"),
        ]);

        volumes.push(secret_volume(key_secret, "key", KEY_FILE));
        volumes.push(secret_volume(cert_secret, "cert", CERT_FILE));
        mounts.push(VolumeMount::read_only(
            secret_volume_name(key_secret),
            KEY_MOUNT_PATH,
        ));
        mounts.push(VolumeMount::read_only(
            secret_volume_name(cert_secret),
            CERT_MOUNT_PATH,
        ));

        let mut container = Container::new(SIGNER_CONTAINER_NAME, &self.signer_image);
        container.args = args;
        container.volume_mounts = mounts;

        let template = PodTemplate {
            metadata: Default::default(),
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

fn secret_volume(secret: &SecretRef, key: &str, path: &str) -> Volume {
    Volume {
        name: secret_volume_name(secret),
        source: VolumeSource::Secret {
            secret_name: secret.name.clone(),
            items: vec![KeyToPath::new(key, path)],
        },
    }
}

/// Module-level sign defaults overlaid with the mapping's sign settings.
/// `None` unless the mapping declares `sign`.
pub fn effective_sign(target: &Target, mapping: &KernelMapping) -> Option<Sign> {
    let own = mapping.sign.as_ref()?;
    let Some(module) = &target.spec.sign else {
        return Some(own.clone());
    };

    Some(Sign {
        unsigned_image: own
            .unsigned_image
            .clone()
            .or_else(|| module.unsigned_image.clone()),
        signed_image: own
            .signed_image
            .clone()
            .or_else(|| module.signed_image.clone()),
        pull: if own.pull == PullOptions::default() {
            module.pull.clone()
        } else {
            own.pull.clone()
        },
        image_pull_secret: own
            .image_pull_secret
            .clone()
            .or_else(|| module.image_pull_secret.clone()),
        key_secret: own.key_secret.clone().or_else(|| module.key_secret.clone()),
        cert_secret: own
            .cert_secret
            .clone()
            .or_else(|| module.cert_secret.clone()),
        files_to_sign: if own.files_to_sign.is_empty() {
            module.files_to_sign.clone()
        } else {
            own.files_to_sign.clone()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn stage() -> SignStage {
        SignStage::new("signer:latest")
    }

    fn full_sign() -> Sign {
        Sign {
            unsigned_image: Some("registry/unsigned:5.14.0".to_string()),
            signed_image: Some("registry/signed:5.14.0".to_string()),
            key_secret: Some(SecretRef::new("key")),
            cert_secret: Some(SecretRef::new("cert")),
            files_to_sign: vec!["/modules/a.ko".to_string(), "/modules/b.ko".to_string()],
            ..Default::default()
        }
    }

    fn persisted(name: &str) -> Target {
        let mut target = Target::new("default", name);
        target.metadata.uid = Some(Uuid::new_v4());
        target
    }

    #[test]
    fn test_module_sign_alone_does_not_run() {
        let target = Target::new("default", "mod-a").with_sign(full_sign());
        let mapping = KernelMapping::literal("5.14.0").with_image("img");
        assert!(!stage().should_run(&target, &mapping));
        assert!(effective_sign(&target, &mapping).is_none());
    }

    #[test]
    fn test_output_image() {
        let target = Target::new("default", "mod-a");
        let mapping = KernelMapping::literal("5.14.0")
            .with_image("registry/img:5.14.0")
            .with_sign(full_sign());
        assert_eq!(
            stage().output_image(&target, &mapping).unwrap(),
            "registry/signed:5.14.0"
        );

        let mapping = KernelMapping::literal("5.14.0")
            .with_image("registry/img:5.14.0")
            .with_sign(Sign::default());
        assert_eq!(
            stage().output_image(&target, &mapping).unwrap(),
            "registry/img:5.14.0"
        );

        let mapping = KernelMapping::literal("5.14.0").with_sign(Sign::default());
        assert_eq!(
            stage().output_image(&target, &mapping),
            Err(StageError::NoOutputImage {
                stage: StageName::Sign
            })
        );
    }

    #[test]
    fn test_module_defaults_fill_missing_fields() {
        let target = Target::new("default", "mod-a").with_sign(full_sign());
        let own = Sign {
            signed_image: Some("registry/other:1".to_string()),
            ..Default::default()
        };
        let mapping = KernelMapping::literal("5.14.0").with_sign(own);

        let sign = effective_sign(&target, &mapping).unwrap();
        assert_eq!(sign.signed(), Some("registry/other:1"));
        assert_eq!(sign.unsigned(), Some("registry/unsigned:5.14.0"));
        assert_eq!(sign.files_to_sign.len(), 2);
    }

    #[test]
    fn test_sign_job_shape() {
        let target = persisted("mod-a");
        let mut sign = full_sign();
        sign.image_pull_secret = Some(SecretRef::new("pull"));
        let mapping = KernelMapping::literal("5.14.0").with_sign(sign);

        let job = stage().build_job(&target, &mapping, "5.14.0").unwrap();
        assert_eq!(job.metadata.generate_name.as_deref(), Some("mod-a-sign-"));

        let container = &job.spec.template.spec.containers[0];
        assert_eq!(container.name, "signimage");
        assert_eq!(container.image, "signer:latest");
        assert_eq!(
            container.args,
            vec![
                "-signedimage",
                "registry/signed:5.14.0",
                "-unsignedimage",
                "registry/unsigned:5.14.0",
                "-pullsecret",
                "/docker_config/config.json",
                "-key",
                "/signingkey/key.priv",
                "-cert",
                "/signingcert/public.der",
                "-filestosign",
                "/modules/a.ko:/modules/b.ko",
            ]
        );
        assert_eq!(job.spec.template.spec.volumes.len(), 3);
        assert_eq!(container.volume_mounts.len(), 3);
    }

    #[test]
    fn test_sign_job_without_pull_secret() {
        let target = persisted("mod-a");
        let mapping = KernelMapping::literal("5.14.0").with_sign(full_sign());

        let job = stage().build_job(&target, &mapping, "5.14.0").unwrap();
        let container = &job.spec.template.spec.containers[0];
        assert!(!container.args.iter().any(|a| a == "-pullsecret"));
        assert_eq!(job.spec.template.spec.volumes.len(), 2);
    }

    #[test]
    fn test_sign_job_requires_key_and_files() {
        let target = persisted("mod-a");

        let mut sign = full_sign();
        sign.key_secret = None;
        let mapping = KernelMapping::literal("5.14.0").with_sign(sign);
        assert!(matches!(
            stage().build_job(&target, &mapping, "5.14.0"),
            Err(StageError::InvalidInput { .. })
        ));

        let mut sign = full_sign();
        sign.files_to_sign.clear();
        let mapping = KernelMapping::literal("5.14.0").with_sign(sign);
        assert!(matches!(
            stage().build_job(&target, &mapping, "5.14.0"),
            Err(StageError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_unsigned_input_falls_back_to_container_image() {
        let target = persisted("mod-a");
        let mut sign = full_sign();
        sign.unsigned_image = None;
        let mapping = KernelMapping::literal("5.14.0")
            .with_image("registry/img:5.14.0")
            .with_sign(sign);

        let job = stage().build_job(&target, &mapping, "5.14.0").unwrap();
        let args = &job.spec.template.spec.containers[0].args;
        assert_eq!(args[3], "registry/img:5.14.0");
    }
}
