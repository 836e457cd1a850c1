/// 计算两个向量的欧氏距离
///
/// 两个向量长度必须相同，调用方负责保证
#[inline(always)]
pub fn euclidean(va: &[f32], vb: &[f32]) -> f32 {
    squared_euclidean(va, vb).sqrt()
}

#[inline(always)]
pub fn euclidean_naive(va: &[f32], vb: &[f32]) -> f32 {
    let mut sum = 0.;
    for i in 0..va.len() {
        let d = va[i] - vb[i];
        sum += d * d;
    }
    sum.sqrt()
}

/// 欧氏距离的平方，按 8 路展开以便编译器自动向量化
#[inline(always)]
pub fn squared_euclidean(va: &[f32], vb: &[f32]) -> f32 {
    debug_assert_eq!(va.len(), vb.len());
    let mut acc = [0f32; 8];
    let ca = va.chunks_exact(8);
    let cb = vb.chunks_exact(8);
    let (ra, rb) = (ca.remainder(), cb.remainder());
    for (a, b) in ca.zip(cb) {
        for j in 0..8 {
            let d = a[j] - b[j];
            acc[j] += d * d;
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for (a, b) in ra.iter().zip(rb) {
        let d = a - b;
        sum += d * d;
    }
    sum
}
