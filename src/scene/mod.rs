//! Scene management
//!
//! Test scenes are built from analytic primitives so that every pass can
//! ray-cast them directly.

mod camera;
mod light;

pub use camera::*;
pub use light::*;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::lighting::MaterialParams;

/// Number of objects along each side of the grid scene
pub const GRID_SIDE: i32 = 11;
/// Distance between neighbouring grid objects
pub const GRID_SPACING: f32 = 2.5;

/// Which test scene to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SceneType {
    #[default]
    SingleObject,
    /// Metalness grows along X, roughness along Z
    ObjectsGrid,
}

/// Primitive used for every object of a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectType {
    #[default]
    Sphere,
    Cube,
}

/// Scene selection as stored in settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    pub scene: SceneType,
    pub object: ObjectType,
}

/// A ray with a normalized direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Closest intersection along a ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub position: Vec3,
    pub normal: Vec3,
    pub object: usize,
}

/// A unit-sized primitive with its own material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneObject {
    pub kind: ObjectType,
    pub position: Vec3,
    /// Sphere radius or cube half extent
    pub size: f32,
    pub material: MaterialParams,
}

impl SceneObject {
    pub fn new(kind: ObjectType, position: Vec3, material: MaterialParams) -> Self {
        Self {
            kind,
            position,
            size: 1.0,
            material,
        }
    }

    /// Distance and normal of the nearest front hit past `t_min`.
    pub fn intersect(&self, ray: &Ray, t_min: f32) -> Option<(f32, Vec3)> {
        match self.kind {
            ObjectType::Sphere => self.intersect_sphere(ray, t_min),
            ObjectType::Cube => self.intersect_cube(ray, t_min),
        }
    }

    fn intersect_sphere(&self, ray: &Ray, t_min: f32) -> Option<(f32, Vec3)> {
        let oc = ray.origin - self.position;
        let b = oc.dot(ray.direction);
        let c = oc.length_squared() - self.size * self.size;
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return None;
        }
        let sqrt_d = discriminant.sqrt();
        let t = [-b - sqrt_d, -b + sqrt_d]
            .into_iter()
            .find(|&t| t > t_min)?;
        let normal = (ray.at(t) - self.position) / self.size;
        Some((t, normal.normalize()))
    }

    fn intersect_cube(&self, ray: &Ray, t_min: f32) -> Option<(f32, Vec3)> {
        let inv = ray.direction.recip();
        let lo = (self.position - Vec3::splat(self.size) - ray.origin) * inv;
        let hi = (self.position + Vec3::splat(self.size) - ray.origin) * inv;
        let t_near = lo.min(hi).max_element();
        let t_far = lo.max(hi).min_element();
        if t_near > t_far || t_far <= t_min {
            return None;
        }
        let t = if t_near > t_min { t_near } else { t_far };

        let local = (ray.at(t) - self.position) / self.size;
        let abs = local.abs();
        let normal = if abs.x >= abs.y && abs.x >= abs.z {
            Vec3::new(local.x.signum(), 0.0, 0.0)
        } else if abs.y >= abs.z {
            Vec3::new(0.0, local.y.signum(), 0.0)
        } else {
            Vec3::new(0.0, 0.0, local.z.signum())
        };
        Some((t, normal))
    }
}

/// Objects and camera of one test scene
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub scene_type: SceneType,
    pub camera: Camera,
    pub objects: Vec<SceneObject>,
}

impl Scene {
    /// Build a test scene. Grid objects override metalness and roughness of `material`.
    pub fn build(settings: SceneSettings, material: &MaterialParams, aspect: f32) -> Self {
        let (camera_position, objects) = match settings.scene {
            SceneType::SingleObject => (
                Vec3::new(-2.0, 3.0, 4.0),
                vec![SceneObject::new(settings.object, Vec3::ZERO, *material)],
            ),
            SceneType::ObjectsGrid => {
                let half = GRID_SIDE / 2;
                let mut objects = Vec::with_capacity((GRID_SIDE * GRID_SIDE) as usize);
                for x in -half..=half {
                    for z in -half..=half {
                        let material = MaterialParams {
                            metalness: (x + half) as f32 / (GRID_SIDE - 1) as f32,
                            perceptual_roughness: (z + half) as f32 / (GRID_SIDE - 1) as f32,
                            ..*material
                        };
                        let position = Vec3::new(x as f32, 0.0, z as f32) * GRID_SPACING;
                        objects.push(SceneObject::new(settings.object, position, material));
                    }
                }
                (Vec3::new(0.0, 14.0, -25.0), objects)
            }
        };

        let mut camera = Camera::new(camera_position, Vec3::ZERO);
        camera.projection.set_aspect(aspect);
        Self {
            scene_type: settings.scene,
            camera,
            objects,
        }
    }

    /// Closest hit along `ray` beyond `t_min`.
    pub fn intersect(&self, ray: &Ray, t_min: f32) -> Option<Hit> {
        closest_hit(&self.objects, ray, t_min)
    }
}

/// Closest hit among `objects` along `ray` beyond `t_min`.
pub fn closest_hit(objects: &[SceneObject], ray: &Ray, t_min: f32) -> Option<Hit> {
    objects
        .iter()
        .enumerate()
        .filter_map(|(index, object)| {
            object.intersect(ray, t_min).map(|(t, normal)| Hit {
                t,
                position: ray.at(t),
                normal,
                object: index,
            })
        })
        .min_by(|a, b| a.t.total_cmp(&b.t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_hit_from_outside() {
        let sphere = SceneObject::new(ObjectType::Sphere, Vec3::ZERO, MaterialParams::default());
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let (t, normal) = sphere.intersect(&ray, 0.0).unwrap();
        assert!((t - 4.0).abs() < 1e-5);
        assert!((normal - Vec3::NEG_Z).length() < 1e-5);
        assert!(sphere.intersect(&Ray::new(Vec3::new(0.0, 2.0, -5.0), Vec3::Z), 0.0).is_none());
    }

    #[test]
    fn test_cube_hit_normal() {
        let cube = SceneObject::new(ObjectType::Cube, Vec3::new(1.0, 0.0, 0.0), MaterialParams::default());
        let ray = Ray::new(Vec3::new(1.5, 5.0, 0.2), Vec3::NEG_Y);
        let (t, normal) = cube.intersect(&ray, 0.0).unwrap();
        assert!((t - 4.0).abs() < 1e-5);
        assert_eq!(normal, Vec3::Y);
    }

    #[test]
    fn test_grid_ramps_parameters() {
        let scene = Scene::build(
            SceneSettings {
                scene: SceneType::ObjectsGrid,
                object: ObjectType::Sphere,
            },
            &MaterialParams::default(),
            1.0,
        );
        assert_eq!(scene.objects.len(), 121);
        let first = &scene.objects[0];
        let last = &scene.objects[120];
        assert_eq!(first.position, Vec3::new(-12.5, 0.0, -12.5));
        assert_eq!(first.material.metalness, 0.0);
        assert_eq!(first.material.perceptual_roughness, 0.0);
        assert_eq!(last.material.metalness, 1.0);
        assert_eq!(last.material.perceptual_roughness, 1.0);
        assert_eq!(scene.camera.position, Vec3::new(0.0, 14.0, -25.0));
    }

    #[test]
    fn test_scene_returns_closest_hit() {
        let scene = Scene::build(SceneSettings::default(), &MaterialParams::default(), 1.0);
        let ray = Ray::new(scene.camera.position, scene.camera.forward());
        let hit = scene.intersect(&ray, 0.0).unwrap();
        assert_eq!(hit.object, 0);
        assert!((hit.position.length() - 1.0).abs() < 1e-4);
    }
}
