//! Built-in providers backed by the remote record store

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{DataProvider, FetchContext, FindPayload};

/// Static description of a store-backed provider
#[derive(Debug)]
pub struct ProviderDescriptor {
    /// Registry key used in `fetch.<param>.type`
    pub name: &'static str,
    pub collection: &'static str,
    pub primary_key: &'static str,
    /// Store applies `select` server-side
    pub server_projection: bool,
}

pub static DOCUMENT: ProviderDescriptor = ProviderDescriptor {
    name: "document",
    collection: "objects",
    primary_key: "_id",
    server_projection: true,
};

pub static DOCUMENT_TYPE: ProviderDescriptor = ProviderDescriptor {
    name: "document_type",
    collection: "types",
    primary_key: "_id",
    server_projection: false,
};

pub static INTERACTION_RUN: ProviderDescriptor = ProviderDescriptor {
    name: "interaction_run",
    collection: "runs",
    primary_key: "_id",
    server_projection: false,
};

pub struct StoreProvider {
    descriptor: &'static ProviderDescriptor,
    context: FetchContext,
}

impl StoreProvider {
    pub fn new(descriptor: &'static ProviderDescriptor, context: FetchContext) -> Self {
        Self {
            descriptor,
            context,
        }
    }
}

#[async_trait]
impl DataProvider for StoreProvider {
    fn name(&self) -> &str {
        self.descriptor.name
    }

    fn supports_projection(&self) -> bool {
        self.descriptor.server_projection
    }

    fn primary_key(&self) -> &str {
        self.descriptor.primary_key
    }

    async fn do_fetch(&self, mut payload: FindPayload) -> Result<Vec<JsonValue>> {
        if !self.descriptor.server_projection {
            payload.select = None;
        }
        self.context
            .store
            .find(self.descriptor.collection, payload, &self.context.execution)
            .await
    }
}
