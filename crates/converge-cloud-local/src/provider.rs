//! Provider adapters for the sandbox kinds
//!
//! One adapter per resource kind of a single-web-server stack: network,
//! subnet, security group, key pair, instance. All of them drive the shared
//! [`LocalCloud`] document; the differences live in a per-kind spec table
//! (id prefix, required attributes, replacement triggers, computed
//! attributes).

use crate::cloud::LocalCloud;
use crate::error::LocalError;
use async_trait::async_trait;
use converge_cloud::{
    Attrs, Created, KindSchema, ProviderRegistry, ProviderResult, ResourceProvider,
};
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

struct KindSpec {
    kind: &'static str,
    prefix: &'static str,
    required: &'static [&'static str],
    replace_on_change: &'static [&'static str],
    /// Provider-assigned attributes preserved across in-place updates.
    computed: &'static [&'static str],
}

static NETWORK: KindSpec = KindSpec {
    kind: "network",
    prefix: "net",
    required: &["cidr_block"],
    replace_on_change: &["cidr_block"],
    computed: &["id"],
};

static SUBNET: KindSpec = KindSpec {
    kind: "subnet",
    prefix: "sub",
    required: &["network_id", "cidr_block"],
    replace_on_change: &["network_id", "cidr_block", "availability_zone"],
    computed: &["id"],
};

static SECURITY_GROUP: KindSpec = KindSpec {
    kind: "security_group",
    prefix: "sg",
    required: &["network_id"],
    replace_on_change: &["network_id", "name"],
    computed: &["id"],
};

static KEY_PAIR: KindSpec = KindSpec {
    kind: "key_pair",
    prefix: "key",
    required: &["public_key"],
    replace_on_change: &["public_key", "name"],
    computed: &["id", "fingerprint"],
};

static INSTANCE: KindSpec = KindSpec {
    kind: "instance",
    prefix: "srv",
    required: &["image", "subnet_id"],
    replace_on_change: &["image", "subnet_id", "key_pair_id", "user_data"],
    computed: &["id", "public_ip", "private_ip"],
};

/// Sandbox adapter for one resource kind.
pub struct LocalProvider {
    spec: &'static KindSpec,
    cloud: Arc<LocalCloud>,
}

impl LocalProvider {
    pub fn network(cloud: Arc<LocalCloud>) -> Self {
        Self { spec: &NETWORK, cloud }
    }

    pub fn subnet(cloud: Arc<LocalCloud>) -> Self {
        Self { spec: &SUBNET, cloud }
    }

    pub fn security_group(cloud: Arc<LocalCloud>) -> Self {
        Self { spec: &SECURITY_GROUP, cloud }
    }

    pub fn key_pair(cloud: Arc<LocalCloud>) -> Self {
        Self { spec: &KEY_PAIR, cloud }
    }

    pub fn instance(cloud: Arc<LocalCloud>) -> Self {
        Self { spec: &INSTANCE, cloud }
    }

    fn validate(&self, attrs: &Attrs) -> Result<(), LocalError> {
        for &required in self.spec.required {
            if !attrs.contains_key(required) {
                return Err(LocalError::MissingAttribute(required.to_string()));
            }
        }
        if let Some(value) = attrs.get("cidr_block") {
            if !value.as_str().is_some_and(|s| s.contains('/')) {
                return Err(LocalError::InvalidAttribute {
                    attr: "cidr_block".to_string(),
                    message: "expected CIDR notation like 10.0.0.0/16".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fill in provider-assigned attributes.
    fn computed(&self, attrs: &mut Attrs, serial: u64) {
        match self.spec.kind {
            "key_pair" => {
                let key = attrs
                    .get("public_key")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                attrs.insert("fingerprint".to_string(), json!(fingerprint(key)));
            }
            "instance" => {
                attrs.insert(
                    "public_ip".to_string(),
                    json!(format!("203.0.113.{}", 1 + serial % 250)),
                );
                attrs.insert(
                    "private_ip".to_string(),
                    json!(format!("10.0.0.{}", 10 + serial % 240)),
                );
            }
            _ => {}
        }
    }
}

fn fingerprint(public_key: &str) -> String {
    let mut hasher = DefaultHasher::new();
    public_key.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    fn kind(&self) -> &str {
        self.spec.kind
    }

    fn schema(&self) -> KindSchema {
        KindSchema::new().with_replace_on_change(self.spec.replace_on_change.iter().copied())
    }

    async fn create(&self, attrs: &Attrs) -> ProviderResult<Created> {
        self.validate(attrs)?;
        let (remote_id, serial) = self.cloud.allocate(self.spec.prefix).await?;

        let mut stored = attrs.clone();
        stored.insert("id".to_string(), json!(remote_id));
        self.computed(&mut stored, serial);

        self.cloud
            .put(self.spec.kind, &remote_id, stored.clone())
            .await?;
        tracing::info!(kind = self.spec.kind, id = %remote_id, "sandbox resource created");
        Ok(Created {
            remote_id,
            attrs: stored,
        })
    }

    async fn read(&self, remote_id: &str) -> ProviderResult<Option<Attrs>> {
        Ok(self.cloud.get(self.spec.kind, remote_id).await)
    }

    async fn update(&self, remote_id: &str, attrs: &Attrs) -> ProviderResult<Attrs> {
        self.validate(attrs)?;
        let stored = self
            .cloud
            .get(self.spec.kind, remote_id)
            .await
            .ok_or_else(|| LocalError::NotFound(remote_id.to_string()))?;

        let mut next = attrs.clone();
        for &key in self.spec.computed {
            if let Some(value) = stored.get(key) {
                next.insert(key.to_string(), value.clone());
            }
        }

        self.cloud.put(self.spec.kind, remote_id, next.clone()).await?;
        tracing::info!(kind = self.spec.kind, id = %remote_id, "sandbox resource updated");
        Ok(next)
    }

    async fn delete(&self, remote_id: &str) -> ProviderResult<()> {
        if !self.cloud.remove(self.spec.kind, remote_id).await? {
            return Err(LocalError::NotFound(remote_id.to_string()).into());
        }
        tracing::info!(kind = self.spec.kind, id = %remote_id, "sandbox resource deleted");
        Ok(())
    }
}

/// Register every sandbox kind into a provider registry.
pub fn register_defaults(registry: &mut ProviderRegistry, cloud: Arc<LocalCloud>) {
    registry.register(Arc::new(LocalProvider::network(cloud.clone())));
    registry.register(Arc::new(LocalProvider::subnet(cloud.clone())));
    registry.register(Arc::new(LocalProvider::security_group(cloud.clone())));
    registry.register(Arc::new(LocalProvider::key_pair(cloud.clone())));
    registry.register(Arc::new(LocalProvider::instance(cloud)));
}
