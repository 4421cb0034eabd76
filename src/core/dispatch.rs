//! Purpose: Capability-gated request/response operations over registered resources.
//! Exports: `Dispatcher`, `Operation`.
//! Role: Transport-neutral core of the request/response surface.
//! Invariants: An operation whose capability is undeclared never reaches plugin code.
//! Invariants: Plugin failures surface as `ErrorKind::Failed` without plugin detail.
use std::sync::Arc;

use serde_json::{Value, json};

use super::error::{Error, ErrorKind};
use super::plugin::{Capability, Payload};
use super::projection::{ListBound, Projection};
use super::registry::{Registry, ResourceRef, resource_uri, service_uri};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn capability(self) -> Capability {
        match self {
            Operation::List => Capability::List,
            Operation::Get => Capability::Get,
            Operation::Create => Capability::Create,
            Operation::Update => Capability::Update,
            Operation::Delete => Capability::Delete,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// `{id, name, uri}` for each registered service.
    pub fn services(&self) -> Vec<Value> {
        self.registry
            .services()
            .iter()
            .map(|service| {
                json!({
                    "id": service.id(),
                    "name": service.name(),
                    "uri": service_uri(service.name()),
                })
            })
            .collect()
    }

    /// `{name, uri}` for each resource of `service`.
    pub fn resources(&self, service: &str) -> Result<Vec<Value>, Error> {
        let service = self.registry.service(service)?;
        Ok(service
            .resources()
            .iter()
            .map(|resource| {
                json!({
                    "name": resource.name().to_lowercase(),
                    "uri": resource_uri(service.name(), resource.name()),
                })
            })
            .collect())
    }

    pub fn list(
        &self,
        service: &str,
        resource: &str,
        offset: Option<&ListBound>,
        limit: Option<&ListBound>,
    ) -> Result<Vec<Payload>, Error> {
        let bound = self.bind(service, resource, Operation::List)?;
        let elements = bound
            .resource()
            .list(offset, limit)
            .ok_or_else(|| Error::not_found(format!("listing for {}", bound.uri())))?;
        Ok(elements.iter().map(|element| element.snapshot()).collect())
    }

    pub fn get(
        &self,
        service: &str,
        resource: &str,
        id: &str,
        projection: Option<&Projection>,
    ) -> Result<Payload, Error> {
        let bound = self.bind(service, resource, Operation::Get)?;
        let element = bound
            .resource()
            .element(id)
            .ok_or_else(|| Error::not_found(format!("element '{id}'")))?;
        let payload = element.snapshot();
        Ok(match projection {
            Some(projection) => projection.apply(&payload),
            None => payload,
        })
    }

    /// `body` is decoded only after the resource and capability checks pass.
    pub fn create(&self, service: &str, resource: &str, body: &[u8]) -> Result<Payload, Error> {
        let bound = self.bind(service, resource, Operation::Create)?;
        let payload = decode_body(body)?;
        let created = bound.resource().create(payload).ok_or_else(|| {
            Error::new(ErrorKind::Failed).with_message(format!("create on {} failed", bound.uri()))
        })?;
        tracing::debug!(uri = %bound.uri(), id = created.id(), "element created");
        Ok(created.snapshot())
    }

    /// `body` is decoded only after the capability check and element lookup pass.
    pub fn update(&self, service: &str, resource: &str, id: &str, body: &[u8]) -> Result<(), Error> {
        let bound = self.bind(service, resource, Operation::Update)?;
        if bound.resource().element(id).is_none() {
            return Err(Error::not_found(format!("element '{id}'")));
        }
        let payload = decode_body(body)?;
        if bound.resource().update(id, payload) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Failed)
                .with_message(format!("update of {}{id} failed", bound.uri())))
        }
    }

    pub fn delete(&self, service: &str, resource: &str, id: &str) -> Result<(), Error> {
        let bound = self.bind(service, resource, Operation::Delete)?;
        if bound.resource().delete(id) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Failed)
                .with_message(format!("delete of {}{id} failed", bound.uri())))
        }
    }

    fn bind(&self, service: &str, resource: &str, operation: Operation) -> Result<ResourceRef, Error> {
        let bound = self.registry.resolve(service, resource)?;
        let capability = operation.capability();
        if !bound.resource().capabilities().has(capability) {
            return Err(Error::not_implemented(format!("{capability} on {}", bound.uri())));
        }
        Ok(bound)
    }
}

fn decode_body(body: &[u8]) -> Result<Payload, Error> {
    let body: Value = serde_json::from_slice(body).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("request body is not valid JSON: {err}"))
            .with_hint("Send field values as {\"field\": value}.")
            .with_source(err)
    })?;
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message("request body must be a JSON object")
            .with_hint("Send field values as {\"field\": value}.")),
    }
}
