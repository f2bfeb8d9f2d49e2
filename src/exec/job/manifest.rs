// src/exec/job/manifest.rs

//! Kubernetes job manifest for one script run.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::errors::Result;
use crate::types::ScriptTicket;

use super::JobSettings;
use super::tailer::{ERROR_FILE_NAME, OUTPUT_FILE_NAME};

pub const MANIFEST_FILE_NAME: &str = "KubernetesJob.yaml";
const WORK_VOLUME: &str = "work";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub backoff_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<u32>,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodTemplate {
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub restart_policy: String,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub mount_path: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub host_path: HostPath,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostPath {
    pub path: String,
}

/// Job name for a ticket: lowercase alphanumerics and dashes, at most 63
/// characters.
pub fn job_name(ticket: &ScriptTicket) -> String {
    let sanitized: String = ticket
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let mut name = format!("scriptagent-{sanitized}");
    name.truncate(63);
    name.trim_end_matches('-').to_string()
}

impl JobManifest {
    /// Manifest running `bootstrap_file_name` from the host workspace
    /// `working_directory`, redirecting its output to the two well-known
    /// files the tailer follows.
    pub fn for_script(
        ticket: &ScriptTicket,
        task_id: &str,
        settings: &JobSettings,
        working_directory: &Path,
        bootstrap_file_name: &str,
        script_arguments: &[String],
    ) -> Self {
        let name = job_name(ticket);
        let mount = format!("{}/{}", settings.work_mount_root.trim_end_matches('/'), ticket);

        let mut script = format!("bash \"{mount}/{bootstrap_file_name}\"");
        for arg in script_arguments {
            script.push_str(&format!(" \"{}\"", arg.replace('"', "\\\"")));
        }
        script.push_str(&format!(
            " 1> \"{mount}/{OUTPUT_FILE_NAME}\" 2> \"{mount}/{ERROR_FILE_NAME}\""
        ));

        let mut labels = BTreeMap::new();
        labels.insert("serverTaskId".to_string(), task_id.to_string());
        labels.insert("scriptTicket".to_string(), ticket.to_string());

        JobManifest {
            api_version: "batch/v1".to_string(),
            kind: "Job".to_string(),
            metadata: ObjectMeta {
                name: name.clone(),
                namespace: settings.namespace.clone(),
                labels,
            },
            spec: JobSpec {
                backoff_limit: 0,
                ttl_seconds_after_finished: settings.ttl_seconds_after_finished,
                template: PodTemplate {
                    spec: PodSpec {
                        restart_policy: "Never".to_string(),
                        containers: vec![Container {
                            name,
                            image: settings.image.clone(),
                            command: vec!["bash".to_string()],
                            args: vec!["-c".to_string(), script],
                            volume_mounts: vec![VolumeMount {
                                mount_path: mount,
                                name: WORK_VOLUME.to_string(),
                            }],
                        }],
                        volumes: vec![Volume {
                            name: WORK_VOLUME.to_string(),
                            host_path: HostPath {
                                path: normalize_host_path(working_directory),
                            },
                        }],
                    },
                },
            },
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// `C:\Work\abc` becomes `/c/Work/abc`; unix paths pass through.
fn normalize_host_path(path: &Path) -> String {
    let raw = path.display().to_string();
    if !raw.contains('\\') {
        return raw;
    }
    let mut parts: Vec<String> = raw.split('\\').map(str::to_string).collect();
    if let Some(first) = parts.first_mut() {
        *first = first.trim_end_matches(':').to_lowercase();
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_are_valid_kubernetes_names() {
        assert_eq!(job_name(&ScriptTicket::new("ABC_123")), "scriptagent-abc-123");
        let long = ScriptTicket::new("x".repeat(100));
        assert!(job_name(&long).len() <= 63);
    }

    #[test]
    fn windows_host_paths_are_normalized() {
        assert_eq!(normalize_host_path(Path::new(r"C:\Work\t1")), "/c/Work/t1");
        assert_eq!(normalize_host_path(Path::new("/var/work/t1")), "/var/work/t1");
    }

    #[test]
    fn manifest_never_restarts_and_redirects_output() {
        let settings = JobSettings::default();
        let manifest = JobManifest::for_script(
            &ScriptTicket::new("t1"),
            "task-9",
            &settings,
            Path::new("/var/work/t1"),
            "Bootstrap.sh",
            &["--flag".to_string()],
        );
        let yaml = manifest.to_yaml().unwrap();

        assert!(yaml.contains("restartPolicy: Never"));
        assert!(yaml.contains("backoffLimit: 0"));
        assert!(yaml.contains("serverTaskId: task-9"));
        let script = &manifest.spec.template.spec.containers[0].args[1];
        assert!(script.starts_with("bash \"/data/work/t1/Bootstrap.sh\" \"--flag\""));
        assert!(script.ends_with("2> \"/data/work/t1/job-error.log\""));
    }
}
