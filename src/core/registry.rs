//! Purpose: Hold the registered services and resolve (service, resource) names to plugins.
//! Exports: `Registry`, `RegistryBuilder`, `ResourceRef`.
//! Role: Built once at startup and shared by reference with the dispatcher and engine.
//! Invariants: Names are matched case-insensitively; duplicates are rejected at build time.
//! Invariants: Immutable after `build`; no interior mutability.
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{Error, ErrorKind};
use super::plugin::{Capability, Resource, Service};

/// A resolved resource together with its owning service.
#[derive(Clone)]
pub struct ResourceRef {
    service: Arc<Service>,
    resource: Arc<dyn Resource>,
}

impl ResourceRef {
    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    pub fn uri(&self) -> String {
        resource_uri(self.service.name(), self.resource.name())
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    services: Vec<Service>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> Result<Registry, Error> {
        let mut services = Vec::with_capacity(self.services.len());
        let mut by_name = HashMap::new();
        let mut resources = HashMap::new();

        for service in self.services {
            let service_key = service.name().to_lowercase();
            if !is_word(&service_key) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid service name '{}'", service.name()))
                    .with_hint("Service names may only contain letters, digits and '_'."));
            }
            if by_name.contains_key(&service_key) {
                return Err(Error::new(ErrorKind::AlreadyExists)
                    .with_message(format!("service '{}' registered twice", service.name())));
            }
            let service = Arc::new(service);
            for resource in service.resources() {
                let resource_key = resource.name().to_lowercase();
                if !is_word(&resource_key) {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("invalid resource name '{}'", resource.name()))
                        .with_hint("Resource names may only contain letters, digits and '_'."));
                }
                let caps = resource.capabilities();
                if caps.has(Capability::ResourceSubscribe) && !caps.has(Capability::List) {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!(
                            "resource '{}' is subscribable but not listable",
                            resource.name()
                        ))
                        .with_hint("Resource subscriptions re-read the listing on every change."));
                }
                let key = (service_key.clone(), resource_key);
                if resources.contains_key(&key) {
                    return Err(Error::new(ErrorKind::AlreadyExists).with_message(format!(
                        "resource '{}' registered twice in service '{}'",
                        resource.name(),
                        service.name()
                    )));
                }
                resources.insert(
                    key,
                    ResourceRef {
                        service: Arc::clone(&service),
                        resource: Arc::clone(resource),
                    },
                );
            }
            tracing::info!(
                service = service.name(),
                resources = service.resources().len(),
                "registered service"
            );
            by_name.insert(service_key, services.len());
            services.push(service);
        }

        Ok(Registry {
            services,
            by_name,
            resources,
        })
    }
}

pub struct Registry {
    services: Vec<Arc<Service>>,
    by_name: HashMap<String, usize>,
    resources: HashMap<(String, String), ResourceRef>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Services in registration order.
    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Result<&Arc<Service>, Error> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|index| &self.services[*index])
            .ok_or_else(|| Error::not_found(format!("service '{name}'")))
    }

    pub fn resolve(&self, service: &str, resource: &str) -> Result<ResourceRef, Error> {
        let service_key = service.to_lowercase();
        if !self.by_name.contains_key(&service_key) {
            return Err(Error::not_found(format!("service '{service}'")));
        }
        self.resources
            .get(&(service_key, resource.to_lowercase()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("resource '{service}/{resource}'")))
    }
}

pub fn service_uri(service: &str) -> String {
    format!("/{}/", service.to_lowercase())
}

pub fn resource_uri(service: &str, resource: &str) -> String {
    format!("/{}/{}/", service.to_lowercase(), resource.to_lowercase())
}

fn is_word(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::{Registry, resource_uri};
    use crate::core::error::ErrorKind;
    use crate::core::memory::MemoryResource;
    use crate::core::plugin::{Capabilities, Capability, Service};
    use std::sync::Arc;

    fn bulbs(caps: Capabilities) -> Arc<MemoryResource> {
        Arc::new(MemoryResource::new("Lights", "Bulbs", caps))
    }

    #[test]
    fn resolves_case_insensitively() {
        let registry = Registry::builder()
            .service(Service::new("Lights").with_resource(bulbs(Capabilities::all())))
            .build()
            .expect("registry");
        let bound = registry.resolve("LIGHTS", "bulbs").expect("resolved");
        assert_eq!(bound.service().name(), "Lights");
        assert_eq!(bound.uri(), "/lights/bulbs/");
        assert_eq!(resource_uri("A", "B"), "/a/b/");
    }

    #[test]
    fn unknown_names_are_not_found() {
        let registry = Registry::builder()
            .service(Service::new("lights").with_resource(bulbs(Capabilities::all())))
            .build()
            .expect("registry");
        let err = registry.resolve("heating", "bulbs").err().expect("missing service");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = registry.resolve("lights", "lamps").err().expect("missing resource");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(registry.service("nope").err().map(|e| e.kind()), Some(ErrorKind::NotFound));
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let err = Registry::builder()
            .service(Service::new("lights"))
            .service(Service::new("LIGHTS"))
            .build()
            .err()
            .expect("duplicate");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn subscribable_resource_must_be_listable() {
        let caps = Capabilities::none().with(Capability::ResourceSubscribe);
        let err = Registry::builder()
            .service(Service::new("lights").with_resource(bulbs(caps)))
            .build()
            .err()
            .expect("invalid capabilities");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn service_names_follow_topic_grammar() {
        let err = Registry::builder()
            .service(Service::new("street-lights"))
            .build()
            .err()
            .expect("invalid name");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
