//! Node shapes synthesized from plain functions.
//!
//! A registered function becomes a node with one input port per by-value
//! parameter (named `a`, `b`, `c`, … unless names are supplied), one output
//! port per [`OutRef`] parameter, and a `"return"` output when the return
//! type is not `()`. Inputs are pulled through the type registry before the
//! call; compute aborts quietly while any input is still absent.

use crate::factory::NodeFactory;
use crate::node::{Node, NodeBehavior, PortUpdate};
use fluxcore::{DataBox, DataValue, FluxError, FunctionOutput, Result, SharedData};
use std::marker::PhantomData;

/// Name of the output port carrying the function's return value.
pub const RETURN_PORT: &str = "return";

/// A mutable out-parameter.
///
/// Declared in a function's signature, it becomes an output port backed by a
/// shared reference box; the function writes results through the handle and
/// the engine propagates them after the call.
pub struct OutRef<T: DataValue> {
    data: SharedData,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DataValue> OutRef<T> {
    pub fn set(&self, value: T) {
        self.data.set(value);
    }

    pub fn get(&self) -> Option<T> {
        self.data.get::<T>()
    }

    pub fn data(&self) -> &SharedData {
        &self.data
    }
}

/// One parameter position of an adapted function.
pub trait FunctionArg: Sized + Send + 'static {
    /// Declares this parameter's port on the node.
    fn declare(node: &Node, key: &str) -> Result<()>;

    /// Pulls this parameter's value; `None` aborts the call.
    fn extract(node: &Node, factory: &NodeFactory, key: &str) -> Result<Option<Self>>;
}

impl<T: DataValue> FunctionArg for T {
    fn declare(node: &Node, key: &str) -> Result<()> {
        node.add_input_of::<T>(key, "", None).map(|_| ())
    }

    fn extract(node: &Node, factory: &NodeFactory, key: &str) -> Result<Option<Self>> {
        let data = node.input_data(key)?;
        let converted = factory.convert(data, T::type_tag())?;
        Ok(converted.and_then(|data| data.get::<T>()))
    }
}

impl<T: DataValue + Default> FunctionArg for OutRef<T> {
    fn declare(node: &Node, key: &str) -> Result<()> {
        let data = DataBox::new_ref(T::default());
        let tag = data.data_type().to_string();
        node.add_output(key, "", &tag, Some(data)).map(|_| ())
    }

    fn extract(node: &Node, _factory: &NodeFactory, key: &str) -> Result<Option<Self>> {
        let data = node.output_data(key)?.ok_or_else(|| {
            FluxError::NotFound(format!("no output storage for mutable parameter `{key}`"))
        })?;
        Ok(Some(OutRef {
            data,
            _marker: PhantomData,
        }))
    }
}

/// A callable with a port layout derivable from its signature.
pub trait NodeFunction<Args>: Send + Sync + 'static {
    const ARITY: usize;

    fn declare(&self, node: &Node, names: &[String]) -> Result<()>;

    /// Calls the function; returns `false` when an absent input aborted it.
    fn invoke(&self, node: &Node, factory: &NodeFactory, names: &[String]) -> Result<bool>;
}

macro_rules! impl_node_function {
    ($count:literal $(, $arg:ident : $idx:tt)*) => {
        impl<Fun, Ret, $($arg,)*> NodeFunction<($($arg,)*)> for Fun
        where
            Fun: Fn($($arg),*) -> Ret + Send + Sync + 'static,
            Ret: FunctionOutput,
            $($arg: FunctionArg,)*
        {
            const ARITY: usize = $count;

            #[allow(unused_variables)]
            fn declare(&self, node: &Node, names: &[String]) -> Result<()> {
                $(<$arg as FunctionArg>::declare(node, &names[$idx])?;)*
                if let Some(tag) = Ret::output_tag() {
                    node.add_output(RETURN_PORT, RETURN_PORT, tag, None)?;
                }
                Ok(())
            }

            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, node: &Node, factory: &NodeFactory, names: &[String]) -> Result<bool> {
                $(
                    let Some($arg) = <$arg as FunctionArg>::extract(node, factory, &names[$idx])? else {
                        return Ok(false);
                    };
                )*
                let result = (self)($($arg),*);
                if let Some(data) = result.into_box() {
                    node.set_output(RETURN_PORT, Some(data), false)?;
                }
                Ok(true)
            }
        }
    };
}

impl_node_function!(0);
impl_node_function!(1, A0: 0);
impl_node_function!(2, A0: 0, A1: 1);
impl_node_function!(3, A0: 0, A1: 1, A2: 2);
impl_node_function!(4, A0: 0, A1: 1, A2: 2, A3: 3);
impl_node_function!(5, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_node_function!(6, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
impl_node_function!(7, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
impl_node_function!(8, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);

/// Default parameter names: `a`, `b`, `c`, …
pub fn default_arg_names(arity: usize) -> Vec<String> {
    (0..arity)
        .map(|index| char::from(b'a' + (index % 26) as u8).to_string())
        .collect()
}

/// Behavior wrapping a function for use as a node.
pub struct FunctionBehavior<F, Args> {
    func: F,
    names: Vec<String>,
    _marker: PhantomData<fn(Args)>,
}

impl<F, Args> FunctionBehavior<F, Args>
where
    F: NodeFunction<Args>,
    Args: 'static,
{
    pub fn new(func: F, names: Option<Vec<String>>) -> Self {
        Self {
            func,
            names: names.unwrap_or_else(|| default_arg_names(F::ARITY)),
            _marker: PhantomData,
        }
    }
}

impl<F, Args> NodeBehavior for FunctionBehavior<F, Args>
where
    F: NodeFunction<Args>,
    Args: Send + 'static,
{
    fn setup(&mut self, node: &Node) -> Result<()> {
        if self.names.len() != F::ARITY {
            return Err(FluxError::InvalidArgument(format!(
                "expected {} argument names, got {}",
                F::ARITY,
                self.names.len()
            )));
        }
        self.func.declare(node, &self.names)
    }

    fn compute(&mut self, node: &Node) -> Result<()> {
        let ran = self
            .func
            .invoke(node, node.env().factory(), &self.names)?;
        if !ran {
            return Ok(());
        }

        for port in node.output_ports() {
            let data = port.data();
            node.events.on_set_output.broadcast(&PortUpdate {
                key: port.key().clone(),
                data: data.clone(),
            });
            node.emit_update(port.key(), data);
        }
        Ok(())
    }
}
