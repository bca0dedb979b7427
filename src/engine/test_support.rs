use uuid::Uuid;

use crate::catalog::NewMedicine;
use crate::config::Config;
use crate::engine::orders::{CreateOrder, OrderLine, create_order};
use crate::engine::progression::advance;
use crate::identity::NewUser;
use crate::models::order::{Order, OrderStatus, ShippingAddress};
use crate::models::partner::{GeoPoint, Partner, PartnerProfile, VehicleInfo};
use crate::models::user::{Requester, User, UserRole};
use crate::state::AppState;

pub const DROP_POINT: GeoPoint = GeoPoint {
    lat: 53.5511,
    lng: 9.9937,
};

pub fn address() -> ShippingAddress {
    ShippingAddress {
        address: "Jungfernstieg 1".to_string(),
        city: "Hamburg".to_string(),
        postal_code: "20354".to_string(),
        phone: "+49 40 555 0101".to_string(),
        location: Some(DROP_POINT),
    }
}

pub struct Fixture {
    pub state: AppState,
    pub customer: User,
    pub admin: Requester,
}

impl Fixture {
    pub fn new() -> Self {
        let state = AppState::new(Config::default());
        let customer = state
            .users
            .register(NewUser {
                name: "Lena".to_string(),
                phone: "+49 151 0000001".to_string(),
                email: None,
                role: UserRole::Customer,
            })
            .unwrap();
        let admin_user = state
            .users
            .register(NewUser {
                name: "Pharmacist".to_string(),
                phone: "+49 151 0000002".to_string(),
                email: None,
                role: UserRole::Admin,
            })
            .unwrap();

        Self {
            state,
            customer,
            admin: Requester {
                user_id: admin_user.id,
                role: UserRole::Admin,
            },
        }
    }

    pub fn customer_requester(&self) -> Requester {
        Requester {
            user_id: self.customer.id,
            role: UserRole::Customer,
        }
    }

    pub fn user(&self, name: &str, role: UserRole) -> Requester {
        let user = self
            .state
            .users
            .register(NewUser {
                name: name.to_string(),
                phone: Uuid::new_v4().to_string(),
                email: None,
                role,
            })
            .unwrap();
        Requester {
            user_id: user.id,
            role,
        }
    }

    pub fn medicine(&self, name: &str, price: f64, stock: u32) -> Uuid {
        self.state
            .catalog
            .add(NewMedicine {
                name: name.to_string(),
                price,
                stock,
            })
            .unwrap()
            .id
    }

    pub fn order(&self, lines: &[(Uuid, i64)], payment_method: &str) -> Order {
        self.order_with_address(lines, payment_method, address())
    }

    pub fn order_with_address(
        &self,
        lines: &[(Uuid, i64)],
        payment_method: &str,
        shipping_address: ShippingAddress,
    ) -> Order {
        create_order(
            &self.state,
            self.customer.id,
            CreateOrder {
                items: lines
                    .iter()
                    .map(|(medicine_id, quantity)| OrderLine {
                        medicine_id: *medicine_id,
                        quantity: *quantity,
                    })
                    .collect(),
                shipping_address,
                payment_method: payment_method.to_string(),
            },
        )
        .unwrap()
    }

    /// A cod order walked up to `packed`, ready for dispatch.
    pub fn packed_order(&self) -> Order {
        self.packed_order_with_address(address())
    }

    pub fn packed_order_with_address(&self, shipping_address: ShippingAddress) -> Order {
        let medicine = self.medicine("Paracetamol 500mg", 3.0, 100);
        let order = self.order_with_address(&[(medicine, 1)], "cod", shipping_address);
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Packed,
        ] {
            advance(&self.state, order.id, status, None, None).unwrap();
        }
        self.state.orders.get(&order.id).unwrap().clone()
    }

    pub fn partner(&self, name: &str, lat: f64, lng: f64) -> Partner {
        let user = self
            .state
            .users
            .create_placeholder_account(name, &Uuid::new_v4().to_string(), None)
            .unwrap();
        self.state
            .partners
            .create(
                &user,
                PartnerProfile {
                    name: name.to_string(),
                    phone: user.phone.clone(),
                    email: None,
                    vehicle: VehicleInfo::default(),
                    location: Some(GeoPoint { lat, lng }),
                },
            )
            .unwrap()
    }
}
