//! Native GPU resource handles
//!
//! A [`GpuResource`] is anything backed by a native graphics object
//! (texture, shader program, vertex buffer) that must be released
//! explicitly against the context that created it.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Errors releasing a native GPU resource
#[derive(Debug, thiserror::Error)]
pub enum DisposalError {
    #[error("native call failed with code {code}: {message}")]
    Native { code: i32, message: String },
    #[error("invalid native handle {0}")]
    InvalidHandle(u64),
    #[error("{0}")]
    Other(String),
}

/// A handle to a native GPU object
///
/// `Debug` is required so that disposals can be traced.
pub trait GpuResource: fmt::Debug {
    /// The render/draw context disposal calls are issued against
    type Context: ?Sized;

    /// Release the native handle
    ///
    /// # Errors
    ///
    /// Returns [`DisposalError`] if the native release call fails.
    fn dispose(&self, dc: &mut Self::Context) -> Result<(), DisposalError>;

    /// Whether `other` refers to the same native object as `self`
    ///
    /// Shared handles (`Rc`, `Arc`) compare by pointer. Uniquely owned
    /// values are never the same object as another value.
    fn same_object(&self, _other: &Self) -> bool
    where
        Self: Sized,
    {
        false
    }
}

impl<T: GpuResource + ?Sized> GpuResource for Rc<T> {
    type Context = T::Context;

    fn dispose(&self, dc: &mut Self::Context) -> Result<(), DisposalError> {
        (**self).dispose(dc)
    }

    fn same_object(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: GpuResource + ?Sized> GpuResource for Arc<T> {
    type Context = T::Context;

    fn dispose(&self, dc: &mut Self::Context) -> Result<(), DisposalError> {
        (**self).dispose(dc)
    }

    fn same_object(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: GpuResource + ?Sized> GpuResource for Box<T> {
    type Context = T::Context;

    fn dispose(&self, dc: &mut Self::Context) -> Result<(), DisposalError> {
        (**self).dispose(dc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Context {
        released: Vec<u64>,
    }

    #[derive(Debug)]
    struct Texture(u64);

    impl GpuResource for Texture {
        type Context = Context;

        fn dispose(&self, dc: &mut Context) -> Result<(), DisposalError> {
            dc.released.push(self.0);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Program(u64);

    impl GpuResource for Program {
        type Context = Context;

        fn dispose(&self, _dc: &mut Context) -> Result<(), DisposalError> {
            Err(DisposalError::InvalidHandle(self.0))
        }
    }

    #[test]
    fn test_rc_same_object() {
        let a = Rc::new(Texture(1));
        let b = Rc::clone(&a);
        let c = Rc::new(Texture(1));

        assert!(a.same_object(&b));
        assert!(!a.same_object(&c));
    }

    #[test]
    fn test_arc_same_object() {
        let a = Arc::new(Texture(1));
        assert!(a.same_object(&Arc::clone(&a)));
        assert!(!a.same_object(&Arc::new(Texture(1))));
    }

    #[test]
    fn test_unique_values_are_never_same() {
        let a = Texture(1);
        assert!(!a.same_object(&a));
    }

    #[test]
    fn test_trait_objects_forward_dispose() {
        let mut dc = Context::default();
        let resources: Vec<Box<dyn GpuResource<Context = Context>>> =
            vec![Box::new(Texture(7)), Box::new(Program(9))];

        assert!(resources[0].dispose(&mut dc).is_ok());
        let err = resources[1].dispose(&mut dc).unwrap_err();

        assert_eq!(dc.released, vec![7]);
        assert_eq!(err.to_string(), "invalid native handle 9");
    }

    #[test]
    fn test_native_error_display() {
        let err = DisposalError::Native {
            code: 0x0502,
            message: "GL_INVALID_OPERATION".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "native call failed with code 1282: GL_INVALID_OPERATION"
        );
    }
}
