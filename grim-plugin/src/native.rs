//! Native plugin libraries loaded with `libloading`. Symbols named in the
//! manifest are resolved eagerly so a bad library fails at load time, not
//! at first keystroke.

use std::path::Path;

use libloading::Library;

use crate::PluginError;

#[derive(Debug)]
pub struct NativePlugin {
    library: Library,
    functions: Vec<String>,
}

impl NativePlugin {
    pub fn open(path: &Path, functions: &[String]) -> Result<Self, PluginError> {
        let describe = |err: &dyn std::fmt::Display| {
            PluginError::PluginLoadFailed(path.display().to_string(), err.to_string())
        };

        // SAFETY: loading a shared object runs its initializers; the path
        // came from a validated manifest the user installed.
        let library = unsafe { Library::new(path) }.map_err(|err| describe(&err))?;

        for name in functions {
            // SAFETY: the symbol is only looked up, not called, and typed as
            // the zero-argument C hook all native plugin entry points use.
            unsafe { library.get::<unsafe extern "C" fn()>(name.as_bytes()) }
                .map_err(|err| describe(&err))?;
        }

        Ok(Self {
            library,
            functions: functions.to_vec(),
        })
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|function| function == name)
    }

    pub fn call(&self, name: &str) -> Result<(), PluginError> {
        if !self.has_function(name) {
            return Err(PluginError::CommandNotFound(name.to_string()));
        }
        // SAFETY: the symbol was resolved at load time with this signature.
        unsafe {
            let symbol = self
                .library
                .get::<unsafe extern "C" fn()>(name.as_bytes())
                .map_err(|err| PluginError::CommandNotFound(err.to_string()))?;
            symbol();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_open_missing_library() {
        let err = NativePlugin::open(Path::new("/no/such/libgrim_plugin.so"), &[]).unwrap_err();
        assert!(matches!(err, PluginError::PluginLoadFailed(..)));
    }
}
