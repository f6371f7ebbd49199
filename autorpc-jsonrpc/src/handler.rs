//! Service methods are ordinary Rust functions that take the service by reference followed by
//! their arguments.  The code that adapts such a function to the dispatcher is called a
//! "handler".
//!
//! [`Handler`] is implemented for every `Fn(&S, T1, .., Tn) -> Result<R, E>` with up to eight
//! arguments, where each `Ti` and `R` implement [`Typed`] and `E` converts into
//! [`MethodError`].  That's what lets a method be registered with nothing more than its name, its
//! parameter names, and the function itself; the types in the function signature supply the
//! parameter and return descriptors.
//!
//! The approach is the same one axum uses for its handlers: a blanket impl per arity, generated by
//! a macro, with the argument tuple as a type parameter of the trait so the impls don't overlap.
use std::any::Any;
use std::marker::PhantomData;

use crate::convert::{ConvertError, TypeDescriptor, Typed, Value};
use crate::error::MethodError;
use crate::method::BoundArguments;

/// What a service method returns.
pub type MethodResult<T> = Result<T, MethodError>;

/// Declared type of one positional slot of a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub ty: TypeDescriptor,
    pub optional: bool,
}

impl Slot {
    pub fn of<T: Typed>() -> Self {
        Self {
            ty: T::descriptor(),
            optional: T::optional(),
        }
    }
}

/// Ways a call through a handler can fail, before the dispatcher turns them into protocol errors.
#[derive(Debug)]
pub enum CallError {
    /// Argument at `index` didn't convert into the parameter type
    Argument { index: usize, source: ConvertError },
    Arity { expected: usize, actual: usize },
    /// The method itself failed
    Method(MethodError),
    /// The service instance wasn't the type the handler was written for
    Instance { expected: &'static str },
}

/// A function that can serve as the implementation of a method on service `S`.
///
/// ## Type Parameters
///
/// - `S`: The service type.  Handlers get a shared reference to the service instance.
/// - `Args`: The tuple of argument types.  This exists only so that the blanket impls for
///   different arities don't conflict; it's erased as soon as the handler is registered.
pub trait Handler<S, Args>: Send + Sync + Sized + 'static {
    /// The declared types of the arguments, in order.
    fn slots() -> Vec<Slot>;

    /// The declared return type.
    fn returns() -> TypeDescriptor;

    /// Convert the arguments, call the function, and convert its result.
    fn call(&self, service: &S, args: Vec<Value>) -> Result<Value, CallError>;
}

/// Invoke a macro for all supported argument counts, zero through eight.
#[rustfmt::skip]
macro_rules! all_the_tuples {
    ($name:ident) => {
        $name!();
        $name!(T1);
        $name!(T1, T2);
        $name!(T1, T2, T3);
        $name!(T1, T2, T3, T4);
        $name!(T1, T2, T3, T4, T5);
        $name!(T1, T2, T3, T4, T5, T6);
        $name!(T1, T2, T3, T4, T5, T6, T7);
        $name!(T1, T2, T3, T4, T5, T6, T7, T8);
    };
}

macro_rules! impl_handler {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, S, R, E, $($ty,)*> Handler<S, ($($ty,)*)> for F
        where
            F: Fn(&S, $($ty,)*) -> Result<R, E> + Send + Sync + 'static,
            S: 'static,
            R: Typed,
            E: Into<MethodError>,
            $( $ty: Typed, )*
        {
            fn slots() -> Vec<Slot> {
                vec![$(Slot::of::<$ty>(),)*]
            }

            fn returns() -> TypeDescriptor {
                R::descriptor()
            }

            fn call(&self, service: &S, args: Vec<Value>) -> Result<Value, CallError> {
                let expected = <[&str]>::len(&[$(stringify!($ty),)*]);
                let actual = args.len();
                if actual != expected {
                    return Err(CallError::Arity { expected, actual });
                }

                let mut args = args.into_iter().enumerate();
                $(
                    let Some((index, value)) = args.next() else {
                        return Err(CallError::Arity { expected, actual });
                    };
                    let $ty = <$ty as Typed>::from_value(value)
                        .map_err(|source| CallError::Argument { index, source })?;
                )*

                let result = self(service, $($ty,)*).map_err(|e| CallError::Method(e.into()))?;
                Ok(result.into_value())
            }
        }
    };
}

all_the_tuples!(impl_handler);

/// Object-safe form of a handler, with the service and argument types erased.
///
/// The service instance arrives as `dyn Any` and is downcast back to the type the handler was
/// registered for.
pub(crate) trait ErasedMethod: Send + Sync + 'static {
    fn call(&self, instance: &(dyn Any + Send + Sync), args: BoundArguments) -> Result<Value, CallError>;
}

pub(crate) struct TypedMethod<S, H, Args> {
    handler: H,
    _marker: PhantomData<fn() -> (S, Args)>,
}

impl<S, H, Args> TypedMethod<S, H, Args> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<S, H, Args> ErasedMethod for TypedMethod<S, H, Args>
where
    S: Send + Sync + 'static,
    H: Handler<S, Args>,
    Args: 'static,
{
    fn call(&self, instance: &(dyn Any + Send + Sync), args: BoundArguments) -> Result<Value, CallError> {
        let service = instance.downcast_ref::<S>().ok_or(CallError::Instance {
            expected: std::any::type_name::<S>(),
        })?;
        self.handler.call(service, args.into_values())
    }
}

/// A method implemented directly against [`BoundArguments`], with explicitly declared types.
pub(crate) struct RawMethod<S, F> {
    func: F,
    _marker: PhantomData<fn() -> S>,
}

impl<S, F> RawMethod<S, F> {
    pub(crate) fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

impl<S, F> ErasedMethod for RawMethod<S, F>
where
    S: Send + Sync + 'static,
    F: Fn(&S, BoundArguments) -> Result<Value, MethodError> + Send + Sync + 'static,
{
    fn call(&self, instance: &(dyn Any + Send + Sync), args: BoundArguments) -> Result<Value, CallError> {
        let service = instance.downcast_ref::<S>().ok_or(CallError::Instance {
            expected: std::any::type_name::<S>(),
        })?;
        (self.func)(service, args).map_err(CallError::Method)
    }
}
