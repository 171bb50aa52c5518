//! 可分离三维高斯平滑.
//!
//! 核为 `exp(-k² / 2σ²)`, `k ∈ [-s, s]`, 归一化后依次沿 x, y, z 卷积. σ 以体素为单位.
//! 卷积在数组边界处重复最外层体素. 输出形状不变, 但最外 `s` 层受边界影响,
//! 因此偏移量增加 `s`, 由后续的门限算子裁去.

use ndarray::{Array3, ArrayView1, ArrayViewMut1, Axis};

use crate::data::{map_scalars, Grid, Scalars, Volume, Voxel};
use crate::error::{invalid, IplResult};
use crate::workers::Workers;

/// 归一化的一维高斯核, 长度 `2 * support + 1`.
pub fn kernel(sigma: f64, support: usize) -> IplResult<Vec<f64>> {
    if !(sigma.is_finite() && sigma > 0.0) {
        invalid!("gauss sigma must be positive, got {sigma}");
    }
    let s = support as f64;
    let raw: Vec<f64> = (0..=2 * support)
        .map(|i| {
            let k = i as f64 - s;
            (-k * k / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    Ok(raw.into_iter().map(|w| w / sum).collect())
}

/// 一维卷积, 越界处取最近的端点.
fn convolve_lane(mut dst: ArrayViewMut1<'_, f64>, src: ArrayView1<'_, f64>, kernel: &[f64]) {
    let n = src.len() as isize;
    let s = (kernel.len() / 2) as isize;
    for i in 0..n {
        let acc: f64 = kernel
            .iter()
            .enumerate()
            .map(|(k, w)| w * src[(i + k as isize - s).clamp(0, n - 1) as usize])
            .sum();
        dst[i as usize] = acc;
    }
}

fn smooth<T: Voxel>(src: &Grid<T>, kernel: &[f64], workers: &Workers) -> (Array3<T>, usize) {
    let mut a = src.mapv(|v| v.as_f64());
    let mut b = Array3::<f64>::zeros(a.raw_dim());
    // x -> y -> z, 结果交替写入 `b` 与 `a`.
    workers.zip_lanes(b.view_mut(), a.view(), Axis(2), |d, s| convolve_lane(d, s, kernel));
    workers.zip_lanes(a.view_mut(), b.view(), Axis(1), |d, s| convolve_lane(d, s, kernel));
    workers.zip_lanes(b.view_mut(), a.view(), Axis(0), |d, s| convolve_lane(d, s, kernel));

    let mut clamped = 0;
    let out = b.mapv(|v| {
        let (o, hit) = T::saturate(v);
        clamped += hit as usize;
        o
    });
    (out, clamped)
}

/// 高斯平滑. 标量类型不变; 整数类型的结果四舍六入五成双.
///
/// `sigma` 以体素为单位, `support` 为截断半径. 输出的偏移量在每个轴上增加 `support`.
pub fn gauss(vol: &Volume, sigma: f64, support: usize, workers: &Workers) -> IplResult<Volume> {
    let kernel = kernel(sigma, support)?;
    log::debug!(
        "gauss: sigma = {sigma}, support = {support}, type = {}, dims = {:?}",
        vol.scalar_type(),
        vol.dims()
    );
    let (scalars, clamped) = map_scalars!(vol.scalars(), a => {
        let (out, clamped) = smooth(a, &kernel, workers);
        (Scalars::from_array(out), clamped)
    });
    if clamped > 0 {
        log::warn!("gauss: clamped {clamped} voxel(s)");
    }
    let offset = vol.offset().map(|o| o + support);
    Ok(vol.derive(*vol.extent(), scalars)?.with_offset(offset))
}

#[cfg(test)]
mod tests {
    use super::{gauss, kernel};
    use crate::data::Volume;
    use crate::workers::Workers;
    use ndarray::Array3;

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let k = kernel(0.8, 2).unwrap();
        assert_eq!(k.len(), 5);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(k[0], k[4]);
        assert!(k[2] > k[1]);
        assert!(kernel(0.0, 1).is_err());
        assert_eq!(kernel(1.0, 0).unwrap(), [1.0]);
    }

    #[test]
    fn test_constant_volume_is_unchanged() {
        let vol = Volume::from_array(Array3::<i16>::from_elem((5, 6, 7), 1200), [1.0; 3]).unwrap();
        let out = gauss(&vol, 1.2, 2, &Workers::serial()).unwrap();
        assert_eq!(out.dims(), vol.dims());
        assert_eq!(out.offset(), [2, 2, 2]);
        assert!(out.data::<i16>().unwrap().iter().all(|v| *v == 1200));
    }

    #[test]
    fn test_impulse_spreads_and_preserves_mass() {
        let mut data = Array3::<f32>::zeros((7, 7, 7));
        data[(3, 3, 3)] = 1000.0;
        let vol = Volume::from_array(data, [1.0; 3]).unwrap().with_offset([1, 0, 0]);
        let w = Workers::new(2).unwrap();
        let out = gauss(&vol, 1.0, 1, &w).unwrap();
        assert_eq!(out.offset(), [2, 1, 1]);
        let a = out.data::<f32>().unwrap();
        assert!((a.sum() - 1000.0).abs() < 1e-2);
        assert!(a[(3, 3, 3)] < 1000.0);
        assert!(a[(3, 3, 4)] > 0.0);
        assert_eq!(a[(3, 3, 5)], 0.0);

        let serial = gauss(&vol, 1.0, 1, &Workers::serial()).unwrap();
        assert_eq!(serial.data::<f32>().unwrap(), a);
    }
}
