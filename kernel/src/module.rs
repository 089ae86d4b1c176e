//! Loadable modules.
//!
//! C header: [`include/linux/module.h`](../../../../include/linux/module.h)

use alloc::{
    boxed::Box,
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::{
    any::Any,
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::{linux_err::*, KernelResult as Result},
    pr_err, pr_info, pr_warn, Kernel,
};

/// The top level entrypoint to implementing a kernel module.
///
/// For any teardown or cleanup operations, your type may implement [`Drop`].
pub trait Module: Sized + Send + Sync + 'static {
    /// Called at module initialization time.
    ///
    /// Use this method to perform whatever setup or registration your module
    /// should do. If it fails, everything registered so far must already be
    /// released, which dropping the partially built fields takes care of.
    ///
    /// Equivalent to the `module_init` macro in the C API.
    fn init(kernel: &Arc<Kernel>, module: &ThisModule) -> Result<Self>;
}

/// Static module metadata, normally generated by [`module!`].
///
/// [`module!`]: crate::module!
pub trait ModuleInfo {
    const NAME: &'static str;
    const AUTHOR: &'static str;
    const DESCRIPTION: &'static str;
    const LICENSE: &'static str;
    /// Parameter names accepted at load time.
    const PARAMS: &'static [&'static str];
}

/// Declares a kernel module.
///
/// # Examples
///
/// ```ignore
/// module! {
///     type: MyModule,
///     name: "my_module",
///     author: "Rust for Linux Contributors",
///     description: "My very own kernel module!",
///     license: "GPL",
///     params: ["buffer_name"],
/// }
/// ```
#[macro_export]
macro_rules! module {
    (
        type: $type:ty,
        name: $name:expr,
        $(author: $author:expr,)?
        $(description: $description:expr,)?
        license: $license:expr
        $(, params: [$($param:expr),* $(,)?])?
        $(,)?
    ) => {
        impl $crate::module::ModuleInfo for $type {
            const NAME: &'static str = $name;
            const AUTHOR: &'static str = $crate::__module_field!($($author)?);
            const DESCRIPTION: &'static str = $crate::__module_field!($($description)?);
            const LICENSE: &'static str = $license;
            const PARAMS: &'static [&'static str] = &[$($($param),*)?];
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __module_field {
    () => {
        ""
    };
    ($value:expr) => {
        $value
    };
}

// Refcount value of a module that `rmmod` is tearing down.
const MODULE_GOING: usize = usize::MAX;

struct ModuleInner {
    name: String,
    refcnt: AtomicUsize,
    params: BTreeMap<String, String>,
}

/// Equivalent to `THIS_MODULE` in the C API.
///
/// Cheap to clone; all clones refer to the same loaded module.
#[derive(Clone)]
pub struct ThisModule(Arc<ModuleInner>);

impl ThisModule {
    fn new(name: &str, params: BTreeMap<String, String>) -> ThisModule {
        ThisModule(Arc::new(ModuleInner {
            name: name.to_string(),
            refcnt: AtomicUsize::new(0),
            params,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Value given for a load-time parameter, if any.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.0.params.get(key).map(String::as_str)
    }

    /// Number of outstanding references pinning the module.
    pub fn refcount(&self) -> usize {
        match self.0.refcnt.load(Ordering::Acquire) {
            MODULE_GOING => 0,
            n => n,
        }
    }

    /// Equivalent to `try_module_get`: fails once unloading has started.
    pub(crate) fn try_get(&self) -> Option<ModuleRef> {
        let mut cur = self.0.refcnt.load(Ordering::Acquire);
        loop {
            if cur == MODULE_GOING {
                return None;
            }
            match self.0.refcnt.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(ModuleRef(self.clone())),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Marks the module as going away if nothing pins it. After this no
    /// [`ThisModule::try_get`] succeeds.
    fn begin_unload(&self) -> bool {
        self.0
            .refcnt
            .compare_exchange(0, MODULE_GOING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn same(&self, other: &ThisModule) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ThisModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThisModule")
            .field("name", &self.0.name)
            .field("refcnt", &self.refcount())
            .finish()
    }
}

/// A reference pinning a module; `module_put` on drop.
pub(crate) struct ModuleRef(ThisModule);

impl Drop for ModuleRef {
    fn drop(&mut self) {
        self.0 .0.refcnt.fetch_sub(1, Ordering::AcqRel);
    }
}

type Instance = Box<dyn Any + Send + Sync>;

struct LoadedModule {
    this: ThisModule,
    // `None` while `init` is still running.
    instance: Option<Instance>,
}

pub(crate) struct ModuleTable {
    loaded: Vec<LoadedModule>,
}

impl ModuleTable {
    pub(crate) fn new() -> Self {
        ModuleTable { loaded: Vec::new() }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.loaded.iter().position(|m| m.this.name() == name)
    }

    pub(crate) fn drain_instances(&mut self) -> Vec<Instance> {
        self.loaded
            .drain(..)
            .filter_map(|m| m.instance)
            .collect()
    }
}

/// One line of `lsmod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSummary {
    pub name: String,
    pub refcount: usize,
    pub live: bool,
}

/// Parses `key=value` pairs separated by whitespace.
///
/// Keys must be listed in `accepted`; a key without `=` is a boolean and gets
/// the value `"1"`, like `insmod` does.
pub(crate) fn parse_params(
    module: &str,
    args: &str,
    accepted: &[&str],
) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for arg in args.split_whitespace() {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key, value),
            None => (arg, "1"),
        };
        if key.is_empty() {
            pr_err!("{}: empty parameter name in '{}'", module, arg);
            return Err(EINVAL);
        }
        if !accepted.contains(&key) {
            pr_warn!("{}: unknown parameter '{}' ignored", module, key);
            return Err(ENOENT);
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

impl Kernel {
    /// Loads module `M`, the `insmod` equivalent.
    ///
    /// `params` is the parameter string, e.g. `"device_name=pcd0"`.
    pub fn insmod<M: Module + ModuleInfo>(self: &Arc<Self>, params: &str) -> Result {
        let params = parse_params(M::NAME, params, M::PARAMS)?;
        let this = ThisModule::new(M::NAME, params);
        {
            let mut modules = self.modules.lock();
            if modules.position(M::NAME).is_some() {
                return Err(EEXIST);
            }
            modules.loaded.push(LoadedModule {
                this: this.clone(),
                instance: None,
            });
        }

        match M::init(self, &this) {
            Ok(instance) => {
                let mut modules = self.modules.lock();
                if let Some(entry) = modules.loaded.iter_mut().find(|m| m.this.same(&this)) {
                    entry.instance = Some(Box::new(instance));
                }
                Ok(())
            }
            Err(e) => {
                pr_err!("{}: module init failed: {:?}", M::NAME, e);
                self.modules.lock().loaded.retain(|m| !m.this.same(&this));
                Err(e)
            }
        }
    }

    /// Unloads a module by name, the `rmmod` equivalent.
    ///
    /// Fails with `EBUSY` while files opened through the module are alive.
    pub fn rmmod(&self, name: &str) -> Result {
        let instance = {
            let mut modules = self.modules.lock();
            let idx = modules.position(name).ok_or(ENOENT)?;
            let entry = &modules.loaded[idx];
            if entry.instance.is_none() || !entry.this.begin_unload() {
                pr_warn!("{}: module is in use", name);
                return Err(EBUSY);
            }
            modules.loaded.remove(idx).instance
        };
        // Module exit runs without the table lock held.
        drop(instance);
        pr_info!("{}: module unloaded", name);
        Ok(())
    }

    /// Lists loaded modules in load order.
    pub fn lsmod(&self) -> Vec<ModuleSummary> {
        self.modules
            .lock()
            .loaded
            .iter()
            .map(|m| ModuleSummary {
                name: m.this.name().to_string(),
                refcount: m.this.refcount(),
                live: m.instance.is_some(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicBool;

    use super::*;

    static DUMMY_EXITED: AtomicBool = AtomicBool::new(false);

    struct Dummy {
        greeting: String,
    }

    impl Module for Dummy {
        fn init(_kernel: &Arc<Kernel>, module: &ThisModule) -> Result<Self> {
            Ok(Dummy {
                greeting: module.param("greeting").unwrap_or("hello").to_string(),
            })
        }
    }

    impl Drop for Dummy {
        fn drop(&mut self) {
            assert!(!self.greeting.is_empty());
            DUMMY_EXITED.store(true, Ordering::SeqCst);
        }
    }

    crate::module! {
        type: Dummy,
        name: "dummy",
        author: "Rust for Linux Contributors",
        license: "GPL",
        params: ["greeting", "verbose"],
    }

    struct Broken;

    impl Module for Broken {
        fn init(_kernel: &Arc<Kernel>, _module: &ThisModule) -> Result<Self> {
            Err(ENODEV)
        }
    }

    crate::module! {
        type: Broken,
        name: "broken",
        license: "GPL",
    }

    #[test]
    fn metadata_from_macro() {
        assert_eq!(<Dummy as ModuleInfo>::NAME, "dummy");
        assert_eq!(<Dummy as ModuleInfo>::DESCRIPTION, "");
        assert_eq!(<Broken as ModuleInfo>::PARAMS.len(), 0);
    }

    #[test]
    fn load_and_unload() {
        let kernel = Kernel::new();
        kernel.insmod::<Dummy>("greeting=hi verbose").unwrap();
        assert_eq!(kernel.insmod::<Dummy>(""), Err(EEXIST));
        assert_eq!(
            kernel.lsmod(),
            alloc::vec![ModuleSummary {
                name: "dummy".to_string(),
                refcount: 0,
                live: true
            }]
        );
        kernel.rmmod("dummy").unwrap();
        assert!(DUMMY_EXITED.load(Ordering::SeqCst));
        assert_eq!(kernel.rmmod("dummy"), Err(ENOENT));
        assert!(kernel.lsmod().is_empty());
    }

    #[test]
    fn failed_init_leaves_nothing_loaded() {
        let kernel = Kernel::new();
        assert_eq!(kernel.insmod::<Broken>(""), Err(ENODEV));
        assert!(kernel.lsmod().is_empty());
    }

    #[test]
    fn params_are_validated() {
        assert_eq!(parse_params("m", "nope=1", &["a"]), Err(ENOENT));
        assert_eq!(parse_params("m", "=1", &["a"]), Err(EINVAL));
        let parsed = parse_params("m", " a=x  b ", &["a", "b"]).unwrap();
        assert_eq!(parsed.get("a").map(String::as_str), Some("x"));
        assert_eq!(parsed.get("b").map(String::as_str), Some("1"));
    }

    #[test]
    fn references_block_unload() {
        let kernel = Kernel::new();
        kernel.insmod::<Dummy>("").unwrap();
        let this = kernel.modules.lock().loaded[0].this.clone();
        let pin = this.try_get().unwrap();
        assert_eq!(this.refcount(), 1);
        assert_eq!(kernel.rmmod("dummy"), Err(EBUSY));
        drop(pin);
        kernel.rmmod("dummy").unwrap();
    }

    #[test]
    fn no_references_once_unload_started() {
        let this = ThisModule::new("going", BTreeMap::new());
        let pin = this.try_get().unwrap();
        assert!(!this.begin_unload());
        drop(pin);
        assert!(this.begin_unload());
        assert!(this.try_get().is_none());
        assert_eq!(this.refcount(), 0);
    }
}
