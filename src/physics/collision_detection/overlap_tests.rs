//! Closed-form overlap tests between a sphere and every other geometry kind.
//!
//! Every test reports signed depth, so the same function serves contact detection (depth
//! above minus the expansion margins) and force evaluation (depth above zero). By
//! convention the normal points from B to A.

use glam::DVec3;

/// Result of an overlap test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereContact {
    /// Unit normal pointing from B to A.
    pub normal: DVec3,
    /// Penetration depth. Negative when separated.
    pub depth: f64,
    /// Contact point: midpoint between the deepest points of A and B along the normal.
    pub point: DVec3,
}

#[inline(always)]
fn contact_from_surface(center: DVec3, radius: f64, normal: DVec3, depth: f64) -> SphereContact {
    SphereContact {
        normal,
        depth,
        point: center + normal * (depth * 0.5 - radius),
    }
}

/// Any unit vector perpendicular to `axis`.
#[inline]
fn any_perpendicular(axis: DVec3) -> DVec3 {
    axis.any_orthonormal_vector()
}

/// Tests a sphere against a sphere.
#[inline(always)]
pub fn sphere_sphere(center_a: DVec3, radius_a: f64, center_b: DVec3, radius_b: f64) -> SphereContact {
    let offset = center_a - center_b;
    let distance = offset.length();
    // Arbitrarily choose (0,1,0) if the two spheres are in the same position.
    let normal = if distance > 0.0 { offset / distance } else { DVec3::Y };
    contact_from_surface(center_a, radius_a, normal, radius_a + radius_b - distance)
}

/// Finds the point of a triangle closest to `p`.
pub fn closest_point_on_triangle(p: DVec3, [a, b, c]: [DVec3; 3]) -> DVec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }
    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }
    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }
    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }
    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }
    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }
    let denominator = 1.0 / (va + vb + vc);
    a + ab * (vb * denominator) + ac * (vc * denominator)
}

/// Tests a sphere against a two-sided triangle.
pub fn sphere_triangle(center: DVec3, radius: f64, vertices: [DVec3; 3]) -> SphereContact {
    let closest = closest_point_on_triangle(center, vertices);
    let offset = center - closest;
    let distance = offset.length();
    let normal = if distance > 0.0 {
        offset / distance
    } else {
        let [a, b, c] = vertices;
        (b - a).cross(c - a).try_normalize().unwrap_or(DVec3::Y)
    };
    contact_from_surface(center, radius, normal, radius - distance)
}

/// Tests a sphere against a plane. The plane's normal is the contact normal.
#[inline(always)]
pub fn sphere_plane(center: DVec3, radius: f64, point: DVec3, normal: DVec3) -> SphereContact {
    let distance = (center - point).dot(normal);
    contact_from_surface(center, radius, normal, radius - distance)
}

/// Tests a sphere against an infinite cylinder surface.
///
/// With `inward` set the sphere is meant to stay inside the cylinder and the normal points
/// towards the axis.
pub fn sphere_cylinder(
    center: DVec3,
    radius: f64,
    axis_point: DVec3,
    axis: DVec3,
    cylinder_radius: f64,
    inward: bool,
) -> SphereContact {
    let relative = center - axis_point;
    let radial = relative - axis * relative.dot(axis);
    let radial_distance = radial.length();
    let outward = if radial_distance > 0.0 {
        radial / radial_distance
    } else {
        any_perpendicular(axis)
    };
    if inward {
        contact_from_surface(
            center,
            radius,
            -outward,
            radius - (cylinder_radius - radial_distance),
        )
    } else {
        contact_from_surface(
            center,
            radius,
            outward,
            radius - (radial_distance - cylinder_radius),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sphere_sphere() {
        let contact = sphere_sphere(DVec3::new(1.5, 0.0, 0.0), 1.0, DVec3::ZERO, 1.0);
        assert_relative_eq!(contact.depth, 0.5);
        assert_eq!(contact.normal, DVec3::X);
        assert_relative_eq!(contact.point.x, 0.75);

        let separated = sphere_sphere(DVec3::new(0.0, 0.0, 3.0), 1.0, DVec3::ZERO, 1.0);
        assert_relative_eq!(separated.depth, -1.0);

        let coincident = sphere_sphere(DVec3::ZERO, 1.0, DVec3::ZERO, 1.0);
        assert_eq!(coincident.normal, DVec3::Y);
        assert_relative_eq!(coincident.depth, 2.0);
    }

    #[test]
    fn test_closest_point_regions() {
        let triangle = [DVec3::ZERO, DVec3::X, DVec3::Y];
        let inside = closest_point_on_triangle(DVec3::new(0.25, 0.25, 1.0), triangle);
        assert_relative_eq!((inside - DVec3::new(0.25, 0.25, 0.0)).length(), 0.0);
        let vertex = closest_point_on_triangle(DVec3::new(-1.0, -1.0, 0.0), triangle);
        assert_eq!(vertex, DVec3::ZERO);
        let edge = closest_point_on_triangle(DVec3::new(1.0, 1.0, 0.0), triangle);
        assert_relative_eq!((edge - DVec3::new(0.5, 0.5, 0.0)).length(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_triangle() {
        let triangle = [DVec3::new(-1.0, -1.0, 0.0), DVec3::new(2.0, -1.0, 0.0), DVec3::new(-1.0, 2.0, 0.0)];
        let contact = sphere_triangle(DVec3::new(0.0, 0.0, 0.4), 0.5, triangle);
        assert_relative_eq!(contact.depth, 0.1, epsilon = 1e-12);
        assert_relative_eq!(contact.normal.z, 1.0);
    }

    #[test]
    fn test_sphere_plane() {
        let contact = sphere_plane(DVec3::new(3.0, 1.0, 0.09), 0.1, DVec3::ZERO, DVec3::Z);
        assert_relative_eq!(contact.depth, 0.01, epsilon = 1e-12);
        assert_relative_eq!(contact.point.z, -0.005, epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_cylinder() {
        let inside = sphere_cylinder(DVec3::new(0.95, 0.0, 5.0), 0.1, DVec3::ZERO, DVec3::Z, 1.0, true);
        assert_relative_eq!(inside.depth, 0.05, epsilon = 1e-12);
        assert_relative_eq!(inside.normal.x, -1.0);

        let outside = sphere_cylinder(DVec3::new(1.05, 0.0, 0.0), 0.1, DVec3::ZERO, DVec3::Z, 1.0, false);
        assert_relative_eq!(outside.depth, 0.05, epsilon = 1e-12);
        assert_relative_eq!(outside.normal.x, 1.0);
    }
}
