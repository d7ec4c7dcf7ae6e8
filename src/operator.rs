//! The operator capability implemented by user-defined operators.

use crate::error::OpError;
use crate::tagger::{TensorMut, TensorRef, WriteMode};

/// Borrowed view of one forward invocation.
///
/// Valid only for the duration of the call; implementations must not
/// retain any of these references.
pub struct ForwardArgs<'a> {
    /// Whether the engine is in a training pass.
    pub is_train: bool,
    /// Input tensors, in argument order.
    pub in_data: &'a [TensorRef],
    /// Output tensors to fill, in output order.
    pub out_data: &'a [TensorMut],
    /// Auxiliary state tensors.
    pub aux: &'a [TensorMut],
    /// One write mode per output tensor.
    pub req: &'a [WriteMode],
}

/// Borrowed view of one backward invocation. Same lifetime contract as
/// [`ForwardArgs`].
pub struct BackwardArgs<'a> {
    /// Gradients flowing in from above, one per output.
    pub out_grad: &'a [TensorRef],
    /// Input tensors from the forward pass.
    pub in_data: &'a [TensorRef],
    /// Output tensors from the forward pass.
    pub out_data: &'a [TensorMut],
    /// Gradients to produce, one per input.
    pub in_grad: &'a [TensorMut],
    /// Auxiliary state tensors.
    pub aux: &'a [TensorMut],
    /// One write mode per input gradient.
    pub req: &'a [WriteMode],
}

/// Shapes produced by [`Operator::infer_shape`], all in host axis order.
///
/// Each list's arity must match the corresponding name list
/// (`list_arguments` / `list_outputs` / `list_auxiliary_states`); the
/// bridge rejects any mismatch before it reaches the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredShapes {
    pub inputs: Vec<Vec<u32>>,
    pub outputs: Vec<Vec<u32>>,
    pub aux: Vec<Vec<u32>>,
}

impl InferredShapes {
    pub fn new(inputs: Vec<Vec<u32>>, outputs: Vec<Vec<u32>>) -> Self {
        InferredShapes {
            inputs,
            outputs,
            aux: Vec::new(),
        }
    }

    pub fn with_aux(mut self, aux: Vec<Vec<u32>>) -> Self {
        self.aux = aux;
        self
    }
}

/// A user-defined operator.
///
/// `forward` and `infer_shape` must be supplied; everything else has a
/// default. Implementations are owned by whatever attaches them to the
/// graph; the bridge keeps only a weak reference.
pub trait Operator: Send + Sync {
    /// Compute outputs from inputs.
    fn forward(&self, args: ForwardArgs<'_>) -> Result<(), OpError>;

    /// Compute input gradients. Default: nothing to propagate.
    fn backward(&self, args: BackwardArgs<'_>) -> Result<(), OpError> {
        let _ = args;
        Ok(())
    }

    /// Given known input shapes (host order), produce the full shape set.
    fn infer_shape(&self, in_shapes: &[Vec<u32>]) -> Result<InferredShapes, OpError>;

    /// Names of the input arguments.
    fn list_arguments(&self) -> Vec<String> {
        vec!["data".to_string()]
    }

    /// Names of the outputs.
    fn list_outputs(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    /// Names of the auxiliary states.
    fn list_auxiliary_states(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether `backward` reads the output gradients.
    fn needs_top_grad(&self) -> bool {
        false
    }

    /// Indices into the concatenated [out-grad, in-data, out-data]
    /// sequence that `backward` depends on. Default: in-data and out-data
    /// always, out-grad only when [`Operator::needs_top_grad`] says so.
    fn declare_backward_dependency(
        &self,
        out_grad: &[usize],
        in_data: &[usize],
        out_data: &[usize],
    ) -> Vec<usize> {
        let mut deps = Vec::with_capacity(out_grad.len() + in_data.len() + out_data.len());
        if self.needs_top_grad() {
            deps.extend_from_slice(out_grad);
        }
        deps.extend_from_slice(in_data);
        deps.extend_from_slice(out_data);
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    struct TopGrad;

    impl Operator for Plain {
        fn forward(&self, _args: ForwardArgs<'_>) -> Result<(), OpError> {
            Ok(())
        }
        fn infer_shape(&self, in_shapes: &[Vec<u32>]) -> Result<InferredShapes, OpError> {
            Ok(InferredShapes::new(in_shapes.to_vec(), in_shapes.to_vec()))
        }
    }

    impl Operator for TopGrad {
        fn forward(&self, _args: ForwardArgs<'_>) -> Result<(), OpError> {
            Ok(())
        }
        fn infer_shape(&self, in_shapes: &[Vec<u32>]) -> Result<InferredShapes, OpError> {
            Ok(InferredShapes::new(in_shapes.to_vec(), in_shapes.to_vec()))
        }
        fn needs_top_grad(&self) -> bool {
            true
        }
    }

    #[test]
    fn default_backward_dependency_excludes_out_grad() {
        let deps = Plain.declare_backward_dependency(&[2], &[5], &[9]);
        assert_eq!(deps, vec![5, 9]);
    }

    #[test]
    fn top_grad_backward_dependency_includes_out_grad_first() {
        let deps = TopGrad.declare_backward_dependency(&[2], &[5], &[9]);
        assert_eq!(deps, vec![2, 5, 9]);
    }

    #[test]
    fn default_name_lists() {
        assert_eq!(Plain.list_arguments(), vec!["data"]);
        assert_eq!(Plain.list_outputs(), vec!["output"]);
        assert!(Plain.list_auxiliary_states().is_empty());
    }
}
