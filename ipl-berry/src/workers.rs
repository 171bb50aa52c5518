//! 显式传递的工作线程池句柄.
//!
//! 算子本身对流水线而言总是阻塞调用. 部分算子 (高斯平滑的各轴扫描,
//! 距离变换的各轴扫描, 逐切片连通域提取, 标定) 会在内部借助该句柄并行.
//! 串行与并行的结果完全一致.

use ndarray::{ArrayView1, ArrayView3, ArrayViewMut1, ArrayViewMut3, Axis, Zip};
use std::env;

use crate::error::IplResult;

#[cfg(feature = "rayon")]
use std::sync::Arc;

/// 指定默认线程数的环境变量.
pub const THREADS_ENV: &str = "IPL_BERRY_THREADS";

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 工作线程池句柄. 克隆开销很小, 克隆体共享同一线程池.
#[derive(Clone, Debug, Default)]
pub struct Workers {
    #[cfg(feature = "rayon")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Workers {
    /// 在调用线程上串行执行一切.
    #[inline]
    pub fn serial() -> Self {
        Self::default()
    }

    /// 创建拥有 `threads` 个线程的线程池. `threads <= 1` 时等价于 [`Self::serial`].
    ///
    /// 未启用 `rayon` feature 时总是返回串行句柄.
    pub fn new(threads: usize) -> IplResult<Self> {
        if threads <= 1 {
            return Ok(Self::serial());
        }
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("ipl-worker-{i}"))
                    .build()
                    .map_err(|e| crate::error::IplError::InvalidParameter(e.to_string()))?;
                Ok(Self { pool: Some(Arc::new(pool)) })
            } else {
                log::debug!("`rayon` feature disabled, ignoring {threads} requested threads");
                Ok(Self::serial())
            }
        }
    }

    /// 从环境变量 `$IPL_BERRY_THREADS` 创建线程池.
    ///
    /// 1. 若环境变量非空且可解析, 则使用其值;
    /// 2. 否则, 使用可用核心数.
    pub fn from_env() -> IplResult<Self> {
        let threads = env::var(THREADS_ENV)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or_else(cpus);
        Self::new(threads)
    }

    /// 是否拥有多于一个线程.
    #[inline]
    pub fn is_parallel(&self) -> bool {
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                self.pool.as_ref().is_some_and(|p| p.current_num_threads() > 1)
            } else {
                false
            }
        }
    }

    /// 沿 `axis` 方向, 成对地遍历 `dst` 和 `src` 的每一条一维 lane 并执行 `op`.
    ///
    /// 两者形状必须一致, 否则程序 panic.
    pub(crate) fn zip_lanes<A, B, F>(
        &self,
        mut dst: ArrayViewMut3<'_, A>,
        src: ArrayView3<'_, B>,
        axis: Axis,
        op: F,
    ) where
        A: Send,
        B: Sync,
        F: Fn(ArrayViewMut1<'_, A>, ArrayView1<'_, B>) + Sync + Send,
    {
        let zip = Zip::from(dst.lanes_mut(axis)).and(src.lanes(axis));
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                match self.pool.as_ref() {
                    Some(pool) => pool.install(|| zip.par_for_each(op)),
                    None => zip.for_each(op),
                }
            } else {
                zip.for_each(op);
            }
        }
    }

    /// 逐个 z 切片 (沿 `Axis(0)`) 对 `dst` 执行 `op`, 同时携带切片索引.
    pub(crate) fn for_each_slice_mut<A, F>(&self, mut dst: ArrayViewMut3<'_, A>, op: F)
    where
        A: Send + Sync,
        F: Fn(usize, ndarray::ArrayViewMut2<'_, A>) + Sync + Send,
    {
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
                match self.pool.as_ref() {
                    Some(pool) => pool.install(|| {
                        dst.axis_iter_mut(Axis(0))
                            .into_par_iter()
                            .enumerate()
                            .for_each(|(i, s)| op(i, s))
                    }),
                    None => dst
                        .axis_iter_mut(Axis(0))
                        .enumerate()
                        .for_each(|(i, s)| op(i, s)),
                }
            } else {
                dst.axis_iter_mut(Axis(0))
                    .enumerate()
                    .for_each(|(i, s)| op(i, s));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Workers;
    use ndarray::{Array3, Axis};

    #[test]
    fn test_serial_and_parallel_agree() {
        let src = Array3::from_shape_fn((4, 5, 6), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let run = |w: &Workers| {
            let mut dst = Array3::<f32>::zeros(src.raw_dim());
            w.zip_lanes(dst.view_mut(), src.view(), Axis(2), |mut d, s| {
                let mut acc = 0.0;
                for (o, i) in d.iter_mut().zip(s.iter()) {
                    acc += *i;
                    *o = acc;
                }
            });
            dst
        };
        let serial = run(&Workers::serial());
        let parallel = run(&Workers::new(3).unwrap());
        assert_eq!(serial, parallel);
        assert_eq!(serial[(1, 2, 5)], (0..6).map(|x| (120 + x) as f32).sum::<f32>());
    }

    #[test]
    fn test_slice_index_is_carried() {
        let mut dst = Array3::<usize>::zeros((3, 2, 2));
        Workers::new(2)
            .unwrap()
            .for_each_slice_mut(dst.view_mut(), |i, mut s| s.fill(i));
        for z in 0..3 {
            assert!(dst.index_axis(Axis(0), z).iter().all(|&v| v == z));
        }
    }
}
