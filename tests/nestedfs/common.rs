use std::sync::Arc;

use ninefs::dbfs::DbFs;
use ninefs::nestedfs::NestedFs;
use ninefs::store::MemoryStore;
use ninefs::vfs::Vfs;

/// Builds a chunked-store backend for mounting.
pub async fn backend() -> Arc<dyn Vfs> {
    let fs = DbFs::open(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
        .await
        .expect("open backend");
    Arc::new(fs)
}

/// A multiplexer with the given prefixes, each over its own backend.
/// Returns the mux and the backends in mount order.
pub async fn nested_with(prefixes: &[&str]) -> (NestedFs, Vec<Arc<dyn Vfs>>) {
    let nested = NestedFs::new();
    let mut backends = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        let fs = backend().await;
        nested.mount(prefix, fs.clone()).await.expect("mount");
        backends.push(fs);
    }
    (nested, backends)
}
