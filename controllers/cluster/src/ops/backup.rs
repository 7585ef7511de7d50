//! etcd backup object set
//!
//! When backups are enabled the engine maintains a ConfigMap (backup
//! script configuration), a Secret (client certificates), a Service
//! (snapshot download endpoint) and the CronJob itself; when disabled it
//! removes all four.

use crate::components::{CERT_DIR, ImageCatalog};
use crate::ops::resource::{ApplyManifest, BACKUP_NAME, DeleteResource, NAMESPACE_SYSTEM};
use crate::ops::{Commander, Operator};
use models::BackupOptions;

fn configmap_manifest(options: &BackupOptions) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": BACKUP_NAME, "namespace": NAMESPACE_SYSTEM },
        "data": {
            "rotate": options.rotate.to_string(),
            "backup-dir": "/backup",
        },
    })
}

fn secret_manifest() -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": BACKUP_NAME, "namespace": NAMESPACE_SYSTEM },
        "type": "Opaque",
        // Certificate material is copied from the node cert directory by
        // the job itself; the secret only pins the expected paths.
        "stringData": {
            "ca": format!("{}/etcd/ca.crt", CERT_DIR),
            "cert": format!("{}/etcd/backup-client.crt", CERT_DIR),
            "key": format!("{}/etcd/backup-client.key", CERT_DIR),
        },
    })
}

fn service_manifest() -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": BACKUP_NAME, "namespace": NAMESPACE_SYSTEM },
        "spec": {
            "selector": { "job-name": BACKUP_NAME },
            "ports": [{ "port": 8080, "targetPort": 8080, "protocol": "TCP" }],
        },
    })
}

fn cronjob_manifest(options: &BackupOptions, images: &ImageCatalog) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "batch/v1",
        "kind": "CronJob",
        "metadata": { "name": BACKUP_NAME, "namespace": NAMESPACE_SYSTEM },
        "spec": {
            "schedule": options.schedule,
            "concurrencyPolicy": "Forbid",
            "jobTemplate": {
                "spec": {
                    "template": {
                        "spec": {
                            "restartPolicy": "Never",
                            "containers": [{
                                "name": "etcdbackup",
                                "image": images.etcdbackup,
                                "args": ["--config=/etc/etcdbackup/config"],
                                "volumeMounts": [
                                    { "name": "config", "mountPath": "/etc/etcdbackup" },
                                    { "name": "backup", "mountPath": "/backup" },
                                ],
                            }],
                            "volumes": [
                                { "name": "config", "configMap": { "name": BACKUP_NAME } },
                                { "name": "backup", "persistentVolumeClaim": { "claimName": options.pvc_name } },
                            ],
                        },
                    },
                },
            },
        },
    })
}

/// Apply (or refresh) the whole backup object set.
pub struct BackupConfigureOperator {
    manifests: std::vec::IntoIter<serde_json::Value>,
}

impl BackupConfigureOperator {
    pub fn new(options: &BackupOptions, images: &ImageCatalog) -> Self {
        let manifests = vec![
            configmap_manifest(options),
            secret_manifest(),
            service_manifest(),
            cronjob_manifest(options, images),
        ];
        Self {
            manifests: manifests.into_iter(),
        }
    }
}

impl Operator for BackupConfigureOperator {
    fn name(&self) -> &'static str {
        "etcd-backup-configure"
    }

    fn targets(&self) -> Vec<String> {
        vec![]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        let manifest = self.manifests.next()?;
        Some(Box::new(ApplyManifest { manifest }))
    }
}

/// Remove the whole backup object set.
pub struct BackupRemoveOperator {
    kinds: std::vec::IntoIter<&'static str>,
}

impl BackupRemoveOperator {
    pub fn new() -> Self {
        Self {
            kinds: vec!["CronJob", "Service", "Secret", "ConfigMap"].into_iter(),
        }
    }
}

impl Default for BackupRemoveOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for BackupRemoveOperator {
    fn name(&self) -> &'static str {
        "etcd-backup-remove"
    }

    fn targets(&self) -> Vec<String> {
        vec![]
    }

    fn next_command(&mut self) -> Option<Box<dyn Commander>> {
        let kind = self.kinds.next()?;
        Some(Box::new(DeleteResource {
            kind: kind.to_string(),
            namespace: NAMESPACE_SYSTEM.to_string(),
            name: BACKUP_NAME.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_applies_all_four_objects() {
        let options = BackupOptions {
            enabled: true,
            schedule: "0 3 * * *".into(),
            rotate: 14,
            pvc_name: "backup-pvc".into(),
        };
        let mut op = BackupConfigureOperator::new(&options, &ImageCatalog::default());
        let details: Vec<String> = std::iter::from_fn(|| op.next_command())
            .map(|c| c.command().detail)
            .collect();
        assert_eq!(details.len(), 4);
        assert!(details[0].starts_with("ConfigMap/"));
        assert!(details[3].starts_with("CronJob/"));
    }

    #[test]
    fn remove_deletes_cronjob_first() {
        let mut op = BackupRemoveOperator::new();
        let first = op.next_command().unwrap().command().detail;
        assert!(first.starts_with("CronJob/"));
    }
}
