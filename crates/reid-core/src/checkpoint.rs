use anyhow::Result;
use log::{info, warn};
use memmap2::MmapOptions;
use safetensors::SafeTensors;
use std::fs::File;
use std::path::Path;
use tch::{nn, Kind, Tensor};

/// Copies pretrained weights from a safetensors file into matching variables
/// of the store. Tensors present on only one side are logged and skipped, so a
/// classification checkpoint can seed a re-ID trunk with a different head.
pub fn load_pretrained<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<usize> {
    let file = File::open(path.as_ref())?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();
    let mut loaded = 0;

    for (name, view) in tensors.tensors() {
        let var = match variables.get_mut(&name) {
            Some(var) => var,
            None => {
                warn!("pretrained tensor {} has no matching variable", name);
                continue;
            }
        };

        let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
        if var.size() != shape {
            warn!(
                "shape mismatch for {}: checkpoint {:?} vs model {:?}",
                name,
                shape,
                var.size()
            );
            continue;
        }

        let kind = match view.dtype() {
            safetensors::Dtype::F32 => Kind::Float,
            safetensors::Dtype::F16 => Kind::Half,
            safetensors::Dtype::BF16 => Kind::BFloat16,
            other => return Err(anyhow::anyhow!("unsupported dtype: {:?}", other)),
        };

        let src = Tensor::from_data_size(view.data(), &shape, kind).to_device(device);
        tch::no_grad(|| {
            var.copy_(&src);
        });
        loaded += 1;
    }

    info!("loaded {} pretrained tensors", loaded);
    Ok(loaded)
}
