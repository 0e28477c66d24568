// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Cross-check model metadata against the static layer description.
//!
//! Every stage that reads a layer from the model goes through
//! [`resolve_conv_layer`], which either returns a fully checked
//! [`ConvLayer`] or a contract-violation error.

use crate::conv::{ConvGeometry, TensorShape};
use crate::error::{Error, Result};
use crate::model::{ModelInspector, TensorDetail};
use crate::network::ConvLayerSpec;

/// A convolution layer whose model metadata matched its description.
#[derive(Debug, Clone)]
pub struct ConvLayer {
    pub name: String,
    pub geometry: ConvGeometry,
    /// Kernel contents in table order (OHWI), when the export carries them.
    pub kernel_data: Option<Vec<i8>>,
}

impl ConvLayer {
    /// Kernel contents, or a missing-key error naming the layer.
    pub fn kernel_values(&self) -> Result<&[i8]> {
        self.kernel_data
            .as_deref()
            .ok_or_else(|| Error::MissingKey(format!("kernel data of layer `{}`", self.name)))
    }
}

/// Convolution operator inputs are (input, kernel, bias).
const CONV_INPUT: usize = 0;
const CONV_KERNEL: usize = 1;
const CONV_BIAS: usize = 2;

fn tensor_at<'a>(
    tensors: &'a [TensorDetail],
    index: i64,
    role: &str,
    layer: &str,
) -> Result<&'a TensorDetail> {
    let t = usize::try_from(index)
        .ok()
        .and_then(|i| tensors.get(i))
        .ok_or_else(|| {
            Error::ContractViolation(format!(
                "{} tensor index {} of layer `{}` is out of range",
                role, index, layer
            ))
        })?;
    if t.index != index {
        return Err(Error::ContractViolation(format!(
            "{} tensor index of layer `{}` not compatible with the expected one ({} != {})",
            role, layer, t.index, index
        )));
    }
    Ok(t)
}

fn shape_of(t: &TensorDetail, role: &str, layer: &str) -> Result<TensorShape> {
    TensorShape::from_dims(&t.shape).ok_or_else(|| {
        Error::ContractViolation(format!(
            "{} tensor of layer `{}` has rank {}, expected 4",
            role,
            layer,
            t.shape.len()
        ))
    })
}

fn operand(list: &[i64], pos: usize, what: &str, layer: &str) -> Result<i64> {
    list.get(pos).copied().ok_or_else(|| {
        Error::ContractViolation(format!("layer `{}` operator has no {}", layer, what))
    })
}

/// Resolve `spec` in `model` and check every index and shape by equality.
pub fn resolve_conv_layer(model: &dyn ModelInspector, spec: &ConvLayerSpec) -> Result<ConvLayer> {
    let layer = spec.name.as_str();
    let ops = model.ops_details();
    let tensors = model.tensor_details();

    let op = ops.get(spec.op_index).ok_or_else(|| {
        Error::ContractViolation(format!(
            "layer `{}` operator index {} is out of range ({} ops)",
            layer,
            spec.op_index,
            ops.len()
        ))
    })?;
    if op.index != spec.op_index as i64 {
        return Err(Error::ContractViolation(format!(
            "CNN layer index not compatible with submitted target layer index ({} != {})",
            op.index, spec.op_index
        )));
    }

    let input = tensor_at(tensors, operand(&op.inputs, CONV_INPUT, "input", layer)?, "input", layer)?;
    let kernel_index = operand(&op.inputs, CONV_KERNEL, "kernel", layer)?;
    let kernel = tensor_at(tensors, kernel_index, "kernel", layer)?;
    tensor_at(tensors, operand(&op.inputs, CONV_BIAS, "bias", layer)?, "bias", layer)?;
    let output = tensor_at(tensors, operand(&op.outputs, 0, "output", layer)?, "output", layer)?;

    let kernel_shape = shape_of(kernel, "kernel", layer)?;
    if kernel_shape[0] != spec.filters {
        return Err(Error::ContractViolation(format!(
            "kernel tensor filters number of layer `{}` not compatible with the expected one ({} != {})",
            layer, kernel_shape[0], spec.filters
        )));
    }
    if kernel_shape[1] != spec.kernel || kernel_shape[2] != spec.kernel {
        return Err(Error::ContractViolation(format!(
            "kernel tensor size of layer `{}` not compatible with the expected one ({}x{} != {}x{})",
            layer, kernel_shape[1], kernel_shape[2], spec.kernel, spec.kernel
        )));
    }
    if spec.stride.h == 0 || spec.stride.w == 0 {
        return Err(Error::ContractViolation(format!(
            "stride of layer `{}` must be positive",
            layer
        )));
    }

    let geometry = ConvGeometry {
        kernel: kernel_shape,
        input: shape_of(input, "input", layer)?,
        output: shape_of(output, "output", layer)?,
        stride: spec.stride,
        padding: spec.padding,
    };
    clilog::debug!(
        "layer {}: kernel {:?}, input {:?}, output {:?}",
        layer,
        geometry.kernel.0,
        geometry.input.0,
        geometry.output.0
    );

    Ok(ConvLayer {
        name: spec.name.clone(),
        geometry,
        // tensor_at checked the index against its table position
        kernel_data: model.tensor_data(kernel_index as usize).map(<[i8]>::to_vec),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{JsonModel, OpDetail};
    use crate::network::NetworkSpec;

    /// A LeNet-5 `conv1`-shaped export with `filters` filters and a
    /// deterministic kernel.
    pub(crate) fn lenet_like_model(filters: usize) -> JsonModel {
        let kernel: Vec<i8> = (0..filters * 25).map(|i| (i as i32 * 7 % 256 - 128) as i8).collect();
        JsonModel {
            tensors: vec![
                TensorDetail { index: 0, name: "input".into(), shape: vec![1, 32, 32, 1], data: None },
                TensorDetail {
                    index: 1,
                    name: "conv1/kernel".into(),
                    shape: vec![filters as i64, 5, 5, 1],
                    data: Some(kernel),
                },
                TensorDetail { index: 2, name: "conv1/bias".into(), shape: vec![filters as i64], data: None },
                TensorDetail {
                    index: 3,
                    name: "conv1/output".into(),
                    shape: vec![1, 28, 28, filters as i64],
                    data: None,
                },
            ],
            ops: vec![OpDetail { index: 0, op: "CONV_2D".into(), inputs: vec![0, 1, 2], outputs: vec![3] }],
        }
    }

    fn conv1_spec(filters: usize) -> ConvLayerSpec {
        let mut spec = NetworkSpec::lenet5().conv_layer("conv1").unwrap().clone();
        spec.filters = filters;
        spec
    }

    #[test]
    fn test_resolve_ok() {
        let model = lenet_like_model(6);
        let layer = resolve_conv_layer(&model, &conv1_spec(6)).unwrap();
        assert_eq!(layer.geometry.kernel, TensorShape([6, 5, 5, 1]));
        assert_eq!(layer.geometry.output, TensorShape([1, 28, 28, 6]));
        assert_eq!(layer.kernel_values().unwrap().len(), 150);
        assert_eq!(layer.geometry.multiplication_count(), 6 * 28 * 28 * 25);
    }

    #[test]
    fn test_filters_mismatch() {
        let model = lenet_like_model(6);
        let err = resolve_conv_layer(&model, &conv1_spec(16)).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
    }

    #[test]
    fn test_tensor_index_mismatch() {
        let mut model = lenet_like_model(6);
        model.tensors[1].index = 7;
        let err = resolve_conv_layer(&model, &conv1_spec(6)).unwrap_err();
        assert!(err.to_string().contains("kernel tensor index"));
    }

    #[test]
    fn test_op_index_mismatch() {
        let mut model = lenet_like_model(6);
        model.ops[0].index = 3;
        assert!(matches!(
            resolve_conv_layer(&model, &conv1_spec(6)),
            Err(Error::ContractViolation(_))
        ));
        model.ops.clear();
        assert!(resolve_conv_layer(&model, &conv1_spec(6)).is_err());
    }

    /// Serves kernel bytes through `tensor_data` only, leaving the table rows bare.
    struct SideLoaded {
        inner: JsonModel,
        kernel: Vec<i8>,
    }

    impl ModelInspector for SideLoaded {
        fn tensor_details(&self) -> &[TensorDetail] {
            &self.inner.tensors
        }

        fn ops_details(&self) -> &[OpDetail] {
            &self.inner.ops
        }

        fn tensor_data(&self, position: usize) -> Option<&[i8]> {
            (position == 1).then_some(self.kernel.as_slice())
        }
    }

    #[test]
    fn test_kernel_data_from_inspector() {
        let mut inner = lenet_like_model(6);
        let kernel = inner.tensors[1].data.take().unwrap();
        let model = SideLoaded { inner, kernel: kernel.clone() };
        let layer = resolve_conv_layer(&model, &conv1_spec(6)).unwrap();
        assert_eq!(layer.kernel_values().unwrap(), &kernel[..]);

        let bare = model.inner.clone();
        let layer = resolve_conv_layer(&bare, &conv1_spec(6)).unwrap();
        assert!(matches!(layer.kernel_values(), Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_kernel_size_mismatch() {
        let model = lenet_like_model(6);
        let mut spec = conv1_spec(6);
        spec.kernel = 3;
        let err = resolve_conv_layer(&model, &spec).unwrap_err();
        assert!(err.to_string().contains("kernel tensor size"));
    }
}
