//! 骨骼节点
//!
//! BoneLink 是骨骼系统的核心单元，每个 BoneLink 代表骨骼层次中的一个节点。
//! 父/子/目标骨骼都用模型骨骼数组中的索引表示，加载时一次性校验。

use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3};

// ============================================================================
// 骨骼类型
// ============================================================================

/// 骨骼类型（对应 PMD 骨骼类型）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BoneKind {
    /// 普通骨骼（可旋转/移动）
    #[default]
    Free,
    /// IK 影响下的根骨骼
    UnderIkRoot,
    /// IK 链中的关节
    IkJoint,
    /// IK 末端（被拉向目标位置的骨骼）
    IkEffector,
    /// 旋转影响下：额外叠加目标骨骼的本地旋转
    UnderRotate,
    /// 旋转追随：按系数追随子骨骼的旋转
    FollowRotate,
    /// 扭转骨骼
    Twist,
    /// 不可见
    Invisible,
    /// 固定（轴限制）
    Fixed,
}

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼运行时标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 由物理模拟驱动（跳过动画/IK 写入的世界变换）
        const SIMULATED = 1 << 0;
        /// 世界位置不依赖模型根（センター）偏移
        const MOTION_INDEPENDENT = 1 << 1;
    }
}

// ============================================================================
// IK 配置
// ============================================================================

/// IK 链接信息
#[derive(Clone, Debug)]
pub struct IkLink {
    /// 链接骨骼索引
    pub bone_index: usize,
    /// 单轴限制（骨骼本地空间中的旋转轴，膝盖一般为 X 轴）
    pub limit_axis: Option<Vec3>,
}

impl IkLink {
    pub fn new(bone_index: usize) -> Self {
        Self { bone_index, limit_axis: None }
    }

    /// 膝盖类关节：只允许绕本地 X 轴旋转
    pub fn knee(bone_index: usize) -> Self {
        Self { bone_index, limit_axis: Some(Vec3::X) }
    }
}

/// IK 配置
#[derive(Clone, Debug)]
pub struct IkConfig {
    /// 末端骨骼索引（要移动到目标位置的骨骼）
    pub effector_bone: usize,
    /// 迭代次数
    pub iterations: u32,
    /// 单次迭代角度限制（弧度）
    pub limit_angle: f32,
    /// IK 链接列表（从末端相邻骨骼到根）
    pub links: Vec<IkLink>,
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点
///
/// - 静态数据：名称、类型、父子关系、绑定姿态原点
/// - 动态数据：本地平移/旋转、缓存的世界变换
/// - 变换计算：local_to_world = parent.local_to_world * local_to_parent
#[derive(Clone, Debug)]
pub struct BoneLink {
    // ========================================
    // 静态数据（初始化后不变）
    // ========================================

    /// 骨骼名称
    pub name: String,

    /// 骨骼类型
    pub kind: BoneKind,

    /// 父骨骼索引
    pub parent_index: Option<usize>,

    /// 子骨骼索引（FollowRotate 追随的骨骼）
    pub child_index: Option<usize>,

    /// 目标骨骼索引（UnderRotate 叠加的骨骼）
    pub target_index: Option<usize>,

    /// FollowRotate 的追随系数（加载时为 目标ID * 0.01）
    pub follow_coefficient: f32,

    /// 骨骼标志
    pub flags: BoneFlags,

    /// 绑定姿态下的世界原点
    pub origin: Vec3,

    /// 相对于父骨骼原点的偏移（compute_offset 计算）
    pub offset: Vec3,

    /// 蒙皮用的"移回原点"矩阵
    pub move_to_origin: Mat4,

    // ========================================
    // 动态数据（每帧更新）
    // ========================================

    /// 本地平移（相对于绑定姿态）
    pub local_translation: Vec3,

    /// 本地旋转
    pub local_rotation: Quat,

    /// 世界变换矩阵
    pub(crate) local_to_world: Mat4,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: impl Into<String>, kind: BoneKind, origin: Vec3) -> Self {
        Self {
            name: name.into(),
            kind,
            parent_index: None,
            child_index: None,
            target_index: None,
            follow_coefficient: 0.0,
            flags: BoneFlags::empty(),
            origin,
            offset: origin,
            move_to_origin: Mat4::from_translation(-origin),
            local_translation: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            local_to_world: Mat4::from_translation(origin),
        }
    }

    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent_index = Some(parent);
        self
    }

    pub fn with_child(mut self, child: usize) -> Self {
        self.child_index = Some(child);
        self
    }

    pub fn with_target(mut self, target: usize) -> Self {
        self.target_index = Some(target);
        self
    }

    // ========================================
    // 访问器
    // ========================================

    /// 是否为根骨骼
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_index.is_none()
    }

    /// 获取世界位置
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.local_to_world.w_axis.truncate()
    }

    /// 获取世界旋转
    #[inline]
    pub fn rotation(&self) -> Quat {
        Quat::from_mat4(&self.local_to_world)
    }

    /// 获取全局变换
    #[inline]
    pub fn global_transform(&self) -> Mat4 {
        self.local_to_world
    }

    /// 设置全局变换（物理回写）
    #[inline]
    pub fn set_global_transform(&mut self, transform: Mat4) {
        self.local_to_world = transform;
    }

    /// 蒙皮矩阵 = local_to_world * move_to_origin
    #[inline]
    pub fn skinning_matrix(&self) -> Mat4 {
        self.local_to_world * self.move_to_origin
    }

    #[inline]
    pub fn is_simulated(&self) -> bool {
        self.flags.contains(BoneFlags::SIMULATED)
    }

    #[inline]
    pub fn set_simulated(&mut self, simulated: bool) {
        self.flags.set(BoneFlags::SIMULATED, simulated);
    }

    #[inline]
    pub fn is_motion_independent(&self) -> bool {
        self.flags.contains(BoneFlags::MOTION_INDEPENDENT)
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 重置本地姿态为单位变换
    #[inline]
    pub fn reset(&mut self) {
        self.local_translation = Vec3::ZERO;
        self.local_rotation = Quat::IDENTITY;
    }

    #[inline]
    pub fn set_local_translation(&mut self, translation: Vec3) {
        self.local_translation = translation;
    }

    #[inline]
    pub fn set_local_rotation(&mut self, rotation: Quat) {
        self.local_rotation = rotation;
    }

    /// 计算相对父骨骼原点的偏移，所有骨骼加载完成后调用一次
    pub fn compute_offset(&mut self, parent_origin: Option<Vec3>) {
        self.offset = match parent_origin {
            Some(parent) => self.origin - parent,
            None => self.origin,
        };
    }

    /// 本地变换 (local_to_parent)
    ///
    /// 平移 = offset + local_translation
    /// 旋转 = local_rotation * inherited_rotation
    #[inline]
    pub fn local_transform(&self, inherited_rotation: Option<Quat>) -> Mat4 {
        let rotation = match inherited_rotation {
            Some(inherited) => self.local_rotation * inherited,
            None => self.local_rotation,
        };
        Mat4::from_rotation_translation(rotation, self.offset + self.local_translation)
    }

    /// 更新世界变换
    ///
    /// 调用方负责保证父骨骼的世界变换已是最新（根到叶顺序）。
    pub fn update_world_transform(&mut self, parent_world: Option<Mat4>, inherited_rotation: Option<Quat>) {
        let local = self.local_transform(inherited_rotation);
        self.local_to_world = match parent_world {
            Some(parent) => parent * local,
            None => local,
        };
    }
}

impl Default for BoneLink {
    fn default() -> Self {
        Self::new(String::new(), BoneKind::Free, Vec3::ZERO)
    }
}

/// 在骨骼数组中刷新单个骨骼的世界变换
///
/// 处理旋转继承：UnderRotate 叠加目标骨骼的本地旋转，
/// FollowRotate 叠加 IDENTITY→子骨骼旋转 按系数 slerp 的结果。
pub(crate) fn refresh_world_transform(bones: &mut [BoneLink], idx: usize) {
    let parent_world = bones[idx].parent_index.map(|p| bones[p].local_to_world);
    let inherited = match bones[idx].kind {
        BoneKind::UnderRotate => bones[idx].target_index.map(|t| bones[t].local_rotation),
        BoneKind::FollowRotate => bones[idx].child_index.map(|c| {
            Quat::IDENTITY.slerp(bones[c].local_rotation, bones[idx].follow_coefficient)
        }),
        _ => None,
    };
    bones[idx].update_world_transform(parent_world, inherited);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_offset() {
        let mut bone = BoneLink::new("arm", BoneKind::Free, Vec3::new(1.0, 2.0, 0.0));
        bone.compute_offset(Some(Vec3::new(1.0, 1.0, 0.0)));
        assert!(bone.offset.abs_diff_eq(Vec3::new(0.0, 1.0, 0.0), 1e-6));

        bone.compute_offset(None);
        assert!(bone.offset.abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1e-6));
    }

    #[test]
    fn test_world_is_parent_times_local() {
        let parent_world = Mat4::from_rotation_translation(
            Quat::from_rotation_y(0.5),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let mut bone = BoneLink::new("child", BoneKind::Free, Vec3::new(0.0, 2.0, 0.0));
        bone.compute_offset(Some(Vec3::new(0.0, 1.0, 0.0)));
        bone.set_local_rotation(Quat::from_rotation_x(0.3));
        bone.set_local_translation(Vec3::new(0.1, 0.0, 0.0));
        bone.update_world_transform(Some(parent_world), None);

        let expected = parent_world * bone.local_transform(None);
        assert!(bone.global_transform().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_reset() {
        let mut bone = BoneLink::default();
        bone.set_local_translation(Vec3::ONE);
        bone.set_local_rotation(Quat::from_rotation_z(1.0));
        bone.reset();
        assert_eq!(bone.local_translation, Vec3::ZERO);
        assert!(bone.local_rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn test_under_rotate_inherits_target_rotation() {
        let mut bones = vec![
            BoneLink::new("target", BoneKind::Free, Vec3::ZERO),
            BoneLink::new("under", BoneKind::UnderRotate, Vec3::ZERO).with_target(0),
        ];
        bones[0].set_local_rotation(Quat::from_rotation_y(0.7));
        refresh_world_transform(&mut bones, 0);
        refresh_world_transform(&mut bones, 1);
        assert!(bones[1].rotation().abs_diff_eq(Quat::from_rotation_y(0.7), 1e-5));
    }

    #[test]
    fn test_follow_rotate_scales_child_rotation() {
        let mut bones = vec![
            BoneLink::new("follow", BoneKind::FollowRotate, Vec3::ZERO).with_child(1),
            BoneLink::new("eye", BoneKind::Free, Vec3::ZERO),
        ];
        bones[0].follow_coefficient = 0.5;
        bones[1].set_local_rotation(Quat::from_rotation_x(1.0));
        refresh_world_transform(&mut bones, 0);
        assert!(bones[0].rotation().abs_diff_eq(Quat::from_rotation_x(0.5), 1e-5));
    }
}
