//! Candle native backend
//!
//! Loads `.safetensors` weights into an ArcFace IResNet backbone built with
//! candle-nn. Parameter paths follow the reference PyTorch `iresnet` module
//! names (`conv1`, `bn1`, `prelu`, `layer{1..4}.{i}.*`, `bn2`, `fc`,
//! `features`), so checkpoints converted from `.pth` load without renaming.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{
    batch_norm, conv2d_no_bias, linear, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Linear,
    Module, ModuleT, VarBuilder,
};
use ndarray::{Array2, Array4};
use tracing::{info, warn};

use super::backend::EmbeddingBackend;
use super::preprocess::Normalization;
use crate::config::Config;

/// Output dimensionality of the reference ArcFace checkpoints
const NUM_FEATURES: usize = 512;

/// IResNet depth variants, selecting the per-stage block counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    R18,
    R34,
    R50,
    R100,
}

impl Arch {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "r18" => Ok(Arch::R18),
            "r34" => Ok(Arch::R34),
            "r50" => Ok(Arch::R50),
            "r100" => Ok(Arch::R100),
            other => anyhow::bail!(
                "unknown candle arch {:?}: expected one of r18, r34, r50, r100",
                other
            ),
        }
    }

    fn layers(self) -> [usize; 4] {
        match self {
            Arch::R18 => [2, 2, 2, 2],
            Arch::R34 => [3, 4, 6, 3],
            Arch::R50 => [3, 4, 14, 3],
            Arch::R100 => [3, 13, 30, 3],
        }
    }
}

/// Map the shared config device string onto a Candle device
fn select_device(name: &str) -> Result<Device> {
    let lower = name.to_ascii_lowercase();
    if lower == "cpu" {
        return Ok(Device::Cpu);
    }

    if lower.starts_with("cuda") || lower == "gpu" {
        #[cfg(feature = "cuda")]
        {
            let ordinal = lower
                .split_once(':')
                .and_then(|(_, n)| n.parse::<usize>().ok())
                .unwrap_or(0);
            return Ok(Device::new_cuda(ordinal)?);
        }
        #[cfg(not(feature = "cuda"))]
        {
            warn!("device {} requested but the cuda feature is not enabled, using CPU", name);
            return Ok(Device::Cpu);
        }
    }

    if lower == "metal" {
        #[cfg(feature = "metal")]
        {
            return Ok(Device::new_metal(0)?);
        }
        #[cfg(not(feature = "metal"))]
        {
            warn!("device {} requested but the metal feature is not enabled, using CPU", name);
            return Ok(Device::Cpu);
        }
    }

    warn!("unrecognized device {:?} for the candle backend, using CPU", name);
    Ok(Device::Cpu)
}

/// PReLU with one slope per channel, broadcast over NCHW
struct PRelu {
    weight: Tensor,
    channels: usize,
}

impl PRelu {
    fn load(channels: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get(channels, "weight")?;
        Ok(Self { weight, channels })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let pos = xs.relu()?;
        // min(x, 0) == x - relu(x)
        let neg = xs.sub(&pos)?;
        let slope = self.weight.reshape((1, self.channels, 1, 1))?;
        pos.add(&neg.broadcast_mul(&slope)?)
    }
}

fn conv3x3(
    in_c: usize,
    out_c: usize,
    stride: usize,
    vb: VarBuilder,
) -> candle_core::Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding: 1,
        stride,
        ..Default::default()
    };
    conv2d_no_bias(in_c, out_c, 3, cfg, vb)
}

fn conv1x1(
    in_c: usize,
    out_c: usize,
    stride: usize,
    vb: VarBuilder,
) -> candle_core::Result<Conv2d> {
    let cfg = Conv2dConfig {
        stride,
        ..Default::default()
    };
    conv2d_no_bias(in_c, out_c, 1, cfg, vb)
}

/// Pre-activation residual block of the IResNet family
struct IBasicBlock {
    bn1: BatchNorm,
    conv1: Conv2d,
    bn2: BatchNorm,
    prelu: PRelu,
    conv2: Conv2d,
    bn3: BatchNorm,
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl IBasicBlock {
    fn load(vb: VarBuilder, inplanes: usize, planes: usize, stride: usize) -> Result<Self> {
        let bn_cfg = BatchNormConfig::default();

        let downsample = if stride != 1 || inplanes != planes {
            let ds_vb = vb.pp("downsample");
            let conv = conv1x1(inplanes, planes, stride, ds_vb.pp("0"))?;
            let bn = batch_norm(planes, bn_cfg, ds_vb.pp("1"))?;
            Some((conv, bn))
        } else {
            None
        };

        Ok(Self {
            bn1: batch_norm(inplanes, bn_cfg, vb.pp("bn1"))?,
            conv1: conv3x3(inplanes, planes, 1, vb.pp("conv1"))?,
            bn2: batch_norm(planes, bn_cfg, vb.pp("bn2"))?,
            prelu: PRelu::load(planes, vb.pp("prelu"))?,
            conv2: conv3x3(planes, planes, stride, vb.pp("conv2"))?,
            bn3: batch_norm(planes, bn_cfg, vb.pp("bn3"))?,
            downsample,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut out = self.bn1.forward_t(xs, false)?;
        out = self.conv1.forward(&out)?;
        out = self.bn2.forward_t(&out, false)?;
        out = self.prelu.forward(&out)?;
        out = self.conv2.forward(&out)?;
        out = self.bn3.forward_t(&out, false)?;

        let identity = match &self.downsample {
            Some((conv, bn)) => bn.forward_t(&conv.forward(xs)?, false)?,
            None => xs.clone(),
        };
        out.add(&identity)
    }
}

/// ArcFace IResNet backbone
struct IResNet {
    conv1: Conv2d,
    bn1: BatchNorm,
    prelu: PRelu,
    layers: Vec<Vec<IBasicBlock>>,
    bn2: BatchNorm,
    fc: Linear,
    features: BatchNorm,
}

impl IResNet {
    fn load(vb: VarBuilder, arch: Arch, input_size: usize) -> Result<Self> {
        anyhow::ensure!(
            input_size % 16 == 0,
            "candle backend requires an input size divisible by 16, got {}",
            input_size
        );

        let bn_cfg = BatchNormConfig::default();
        let blocks = arch.layers();
        let planes = [64usize, 128, 256, 512];

        let mut layers = Vec::with_capacity(4);
        let mut inplanes = 64;
        for (stage, (&n_blocks, &out_planes)) in blocks.iter().zip(planes.iter()).enumerate() {
            let stage_vb = vb.pp(format!("layer{}", stage + 1));
            let mut stage_blocks = Vec::with_capacity(n_blocks);
            stage_blocks.push(IBasicBlock::load(stage_vb.pp("0"), inplanes, out_planes, 2)?);
            for i in 1..n_blocks {
                stage_blocks.push(IBasicBlock::load(
                    stage_vb.pp(i.to_string()),
                    out_planes,
                    out_planes,
                    1,
                )?);
            }
            layers.push(stage_blocks);
            inplanes = out_planes;
        }

        // Four stride-2 stages shrink the spatial extent by 16.
        let fc_scale = (input_size / 16) * (input_size / 16);

        Ok(Self {
            conv1: conv3x3(3, 64, 1, vb.pp("conv1"))?,
            bn1: batch_norm(64, bn_cfg, vb.pp("bn1"))?,
            prelu: PRelu::load(64, vb.pp("prelu"))?,
            layers,
            bn2: batch_norm(512, bn_cfg, vb.pp("bn2"))?,
            fc: linear(512 * fc_scale, NUM_FEATURES, vb.pp("fc"))?,
            features: batch_norm(NUM_FEATURES, bn_cfg, vb.pp("features"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = self.conv1.forward(xs)?;
        xs = self.bn1.forward_t(&xs, false)?;
        xs = self.prelu.forward(&xs)?;
        for stage in &self.layers {
            for block in stage {
                xs = block.forward(&xs)?;
            }
        }
        xs = self.bn2.forward_t(&xs, false)?;
        xs = xs.flatten_from(1)?;
        xs = self.fc.forward(&xs)?;
        self.features.forward_t(&xs, false)
    }
}

pub struct CandleBackend {
    model: IResNet,
    device: Device,
}

impl CandleBackend {
    pub fn load(path: &Path, config: &Config) -> Result<Self> {
        let device = select_device(&config.inference.device)?;
        let arch = Arch::from_name(&config.inference.arch)?;

        info!("Loading candle {:?} weights from {}", arch, path.display());
        let start = Instant::now();

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path.to_path_buf()], DType::F32, &device)?
        };
        let model = IResNet::load(vb, arch, config.preprocess.input_size as usize)
            .with_context(|| format!("failed to build {:?} from {}", arch, path.display()))?;

        info!("Candle model loaded in {:?}", start.elapsed());

        Ok(Self { model, device })
    }
}

impl EmbeddingBackend for CandleBackend {
    fn name(&self) -> &'static str {
        "candle"
    }

    fn default_normalization(&self) -> Normalization {
        Normalization::Arcface
    }

    fn embedding_dim(&self) -> Option<usize> {
        Some(NUM_FEATURES)
    }

    fn embed_batch(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        let (n, c, h, w) = batch.dim();

        let data = batch
            .as_slice()
            .context("batch tensor is not contiguous")?
            .to_vec();
        let input = Tensor::from_vec(data, (n, c, h, w), &self.device)?;

        let output = self.model.forward(&input)?;
        let rows: Vec<Vec<f32>> = output.to_vec2()?;
        let dim = rows.first().map(|r| r.len()).unwrap_or(NUM_FEATURES);

        Ok(Array2::from_shape_vec((n, dim), rows.concat())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    #[test]
    fn test_arch_from_name() {
        assert_eq!(Arch::from_name("r18").unwrap(), Arch::R18);
        assert_eq!(Arch::from_name("R100").unwrap(), Arch::R100);
        assert!(Arch::from_name("vgg16").is_err());
    }

    #[test]
    fn test_arch_block_counts() {
        assert_eq!(Arch::R34.layers(), [3, 4, 6, 3]);
        assert_eq!(Arch::R100.layers(), [3, 13, 30, 3]);
    }

    #[test]
    fn test_select_device_cpu() {
        let device = select_device("CPU").unwrap();
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn test_iresnet_output_shape() {
        // Fresh zero-initialized variables stand in for real weights; the
        // small input keeps the forward pass cheap.
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = IResNet::load(vb, Arch::R18, 16).unwrap();

        let input = Tensor::zeros((2, 3, 16, 16), DType::F32, &Device::Cpu).unwrap();
        let output = model.forward(&input).unwrap();
        assert_eq!(output.dims(), &[2, NUM_FEATURES]);
    }

    #[test]
    fn test_iresnet_rejects_unaligned_input_size() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(IResNet::load(vb, Arch::R18, 100).is_err());
    }
}
