use slotmap::new_key_type;

new_key_type! {
    pub struct FiberId;
    pub struct SolidId;
    pub struct SingleId;
    pub struct CoupleId;
}
