//! Kinematics: where a vehicle ends up after one motion step.
//!
//! All functions are pure. A vehicle either flies straight at its target or,
//! once it reaches the loiter circle around the target, keeps flying along
//! that circle. Steps that cross the circle are split into a straight part and
//! an arc part so that the full step length `speed * dt` is always used.

use crate::geometry::Point;

/// Sign applied to the loiter turn angle `arc_length / radius`.
///
/// `+1.0` makes the polar angle about the loiter center increase. On the
/// simulation display Y grows downwards, so increasing angles are seen as
/// clockwise travel. Changing the coordinate convention must not change this
/// constant's meaning: loiter stays clockwise on screen.
pub const LOITER_TURN_SIGN: f64 = 1.0;

/// Separation below which the escape ray from the target through the vehicle
/// is treated as undefined.
const ESCAPE_EPSILON: f64 = 1e-9;

/// Move in a straight line from `current` toward `target`.
///
/// Travels `speed * dt` but never past `target`.
pub fn move_toward(current: Point, target: Point, speed: f64, dt: f64) -> Point {
    let step = speed * dt;
    let dist = current.distance(&target);
    if dist <= step {
        return target;
    }
    current.lerp(&target, step / dist)
}

/// Travel `arc_length` along the circle of `radius` around `center`, starting
/// from the polar angle of `current`.
///
/// The result always lies on the circle, whatever the distance of `current`
/// from `center`. A non-positive radius is a degenerate circle and yields
/// `center`.
pub fn move_on_arc(current: Point, center: Point, radius: f64, arc_length: f64) -> Point {
    if radius <= 0.0 {
        return center;
    }
    let angle = (current.y - center.y).atan2(current.x - center.x);
    let turned = angle + LOITER_TURN_SIGN * arc_length / radius;
    Point::new(
        center.x + radius * turned.cos(),
        center.y + radius * turned.sin(),
    )
}

/// Approach-then-loiter trajectory: one step of a vehicle pursuing `target`
/// with a loiter circle of `radius`.
///
/// - collocated with the target: stays put;
/// - outside the circle: straight approach, switching to the arc for whatever
///   is left of the step once the circle is reached;
/// - inside the circle: straight escape outward along the ray from the target
///   through the vehicle, then the arc.
pub fn move_vehicle(current: Point, target: Point, radius: f64, speed: f64, dt: f64) -> Point {
    let dist = current.distance(&target);
    let step = speed * dt;

    if dist == 0.0 {
        return current;
    }

    if dist >= radius {
        if dist - step >= radius {
            return move_toward(current, target, speed, dt);
        }
        let to_circle = dist - radius;
        let boundary = current.lerp(&target, to_circle / dist);
        return move_on_arc(boundary, target, radius, step - to_circle);
    }

    let boundary = if dist < ESCAPE_EPSILON {
        Point::new(target.x + radius, target.y)
    } else {
        target.lerp(&current, radius / dist)
    };

    if step + dist <= radius {
        return move_toward(current, boundary, speed, dt);
    }
    let to_circle = radius - dist;
    move_on_arc(boundary, target, radius, step - to_circle)
}
